use bytes::Bytes;
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, Quality};
use thiserror::Error;

/// 16-bit signed samples
pub const SAMPLE_SIZE: u8 = 16;
pub const CHANNELS: u8 = 2;
pub const SAMPLE_RATE: u32 = 44_100;

/// Layout of the raw PCM every source carries. Broadcast-wide, never negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u8,
    pub bit_depth: u8,
    pub sample_rate: u32,
}

impl PcmFormat {
    /// Bytes per interleaved sample frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.channels as usize * (self.bit_depth as usize / 8)
    }

    pub fn byte_rate(&self) -> u64 {
        self.frame_size() as u64 * self.sample_rate as u64
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            channels: CHANNELS,
            bit_depth: SAMPLE_SIZE,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder configuration rejected: {0}")]
    Config(String),

    #[error("encoder rejected input: {0}")]
    Encode(String),

    #[error("unsupported pcm format: {0:?}")]
    Unsupported(PcmFormat),
}

/// Raw PCM in, compressed bytes out. One instance per client stream.
pub trait Encoder: Send {
    /// Feeds `pcm` and returns whatever output is ready, possibly nothing.
    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, EncoderError>;

    /// Drains output still buffered inside the encoder.
    fn flush(&mut self) -> Result<Bytes, EncoderError>;
}

pub trait EncoderFactory: Send + Sync {
    fn create(&self, format: PcmFormat) -> Result<Box<dyn Encoder>, EncoderError>;

    /// Byte unit the input must be cut on. PCM encoders need whole sample frames.
    fn input_alignment(&self, format: PcmFormat) -> usize {
        format.frame_size()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Constant bitrate in kbps.
    pub bitrate_kbps: u32,
    /// LAME algorithm quality, 0 (best) to 9 (fastest).
    pub quality: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bitrate_kbps: 128,
            quality: 5,
        }
    }
}

fn quality_from_level(level: u8) -> Result<Quality, EncoderError> {
    let quality = match level {
        0 => Quality::Best,
        1 => Quality::SecondBest,
        2 => Quality::NearBest,
        3 => Quality::VeryNice,
        4 => Quality::Nice,
        5 => Quality::Good,
        6 => Quality::Decent,
        7 => Quality::Ok,
        8 => Quality::SecondWorst,
        9 => Quality::Worst,
        other => return Err(EncoderError::Config(format!("unsupported quality {other}"))),
    };
    Ok(quality)
}

fn bitrate_from_kbps(kbps: u32) -> Result<Bitrate, EncoderError> {
    let bitrate = match kbps {
        8 => Bitrate::Kbps8,
        16 => Bitrate::Kbps16,
        24 => Bitrate::Kbps24,
        32 => Bitrate::Kbps32,
        40 => Bitrate::Kbps40,
        48 => Bitrate::Kbps48,
        64 => Bitrate::Kbps64,
        80 => Bitrate::Kbps80,
        96 => Bitrate::Kbps96,
        112 => Bitrate::Kbps112,
        128 => Bitrate::Kbps128,
        160 => Bitrate::Kbps160,
        192 => Bitrate::Kbps192,
        224 => Bitrate::Kbps224,
        256 => Bitrate::Kbps256,
        320 => Bitrate::Kbps320,
        other => return Err(EncoderError::Config(format!("unsupported bitrate {other} kbps"))),
    };
    Ok(bitrate)
}

/// MP3 encoder backed by LAME.
pub struct LameEncoder {
    inner: mp3lame_encoder::Encoder,
    format: PcmFormat,
    /// Trailing bytes of an incomplete sample frame, completed by the next write.
    pending: Vec<u8>,
    samples: Vec<i16>,
}

impl LameEncoder {
    pub fn new(format: PcmFormat, settings: &Settings) -> Result<Self, EncoderError> {
        if format.bit_depth != 16 || !(1..=2).contains(&format.channels) {
            return Err(EncoderError::Unsupported(format));
        }
        let bitrate = bitrate_from_kbps(settings.bitrate_kbps)?;
        let quality = quality_from_level(settings.quality)?;

        let mut builder = Builder::new()
            .ok_or_else(|| EncoderError::Config("failed to allocate LAME encoder".to_string()))?;
        builder
            .set_num_channels(format.channels)
            .map_err(|e| EncoderError::Config(format!("channels: {:?}", e)))?;
        builder
            .set_sample_rate(format.sample_rate)
            .map_err(|e| EncoderError::Config(format!("sample rate: {:?}", e)))?;
        builder
            .set_brate(bitrate)
            .map_err(|e| EncoderError::Config(format!("bitrate: {:?}", e)))?;
        builder
            .set_quality(quality)
            .map_err(|e| EncoderError::Config(format!("quality: {:?}", e)))?;
        let inner = builder
            .build()
            .map_err(|e| EncoderError::Config(format!("build: {:?}", e)))?;

        Ok(Self {
            inner,
            format,
            pending: Vec::new(),
            samples: Vec::new(),
        })
    }
}

impl Encoder for LameEncoder {
    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, EncoderError> {
        self.pending.extend_from_slice(pcm);
        let frame_size = self.format.frame_size();
        let usable = self.pending.len() - self.pending.len() % frame_size;
        if usable == 0 {
            return Ok(Bytes::new());
        }

        self.samples.clear();
        self.samples.extend(
            self.pending[..usable]
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
        self.pending.drain(..usable);

        let capacity = mp3lame_encoder::max_required_buffer_size(self.samples.len());
        let mut out = Vec::with_capacity(capacity);
        self.inner
            .encode_to_vec(InterleavedPcm(&self.samples), &mut out)
            .map_err(|e| EncoderError::Encode(format!("{:?}", e)))?;
        Ok(Bytes::from(out))
    }

    fn flush(&mut self) -> Result<Bytes, EncoderError> {
        self.pending.clear();
        let mut out = Vec::with_capacity(7200);
        self.inner
            .flush_to_vec::<FlushNoGap>(&mut out)
            .map_err(|e| EncoderError::Encode(format!("{:?}", e)))?;
        Ok(Bytes::from(out))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LameEncoderFactory {
    settings: Settings,
}

impl LameEncoderFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl EncoderFactory for LameEncoderFactory {
    fn create(&self, format: PcmFormat) -> Result<Box<dyn Encoder>, EncoderError> {
        Ok(Box::new(LameEncoder::new(format, &self.settings)?))
    }
}

/// Forwards input untouched, for sources that are already encoded.
#[derive(Debug, Default)]
pub struct PassthroughEncoder;

impl Encoder for PassthroughEncoder {
    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, EncoderError> {
        Ok(Bytes::copy_from_slice(pcm))
    }

    fn flush(&mut self) -> Result<Bytes, EncoderError> {
        Ok(Bytes::new())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEncoderFactory;

impl EncoderFactory for PassthroughEncoderFactory {
    fn create(&self, _format: PcmFormat) -> Result<Box<dyn Encoder>, EncoderError> {
        Ok(Box::new(PassthroughEncoder))
    }

    fn input_alignment(&self, _format: PcmFormat) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cd_format() {
        let format = PcmFormat::default();
        assert_eq!(format.frame_size(), 4);
        assert_eq!(format.byte_rate(), 176_400);
    }

    #[test]
    fn test_passthrough_is_identity() {
        let mut encoder = PassthroughEncoderFactory
            .create(PcmFormat::default())
            .unwrap();
        assert_eq!(&encoder.encode(b"abc").unwrap()[..], b"abc");
        assert!(encoder.flush().unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_bitrate() {
        let settings = Settings {
            bitrate_kbps: 100,
            ..Settings::default()
        };
        assert!(matches!(
            LameEncoder::new(PcmFormat::default(), &settings),
            Err(EncoderError::Config(_))
        ));
    }

    #[test]
    fn test_every_quality_level_builds() {
        for quality in 0..=9 {
            let settings = Settings {
                quality,
                ..Settings::default()
            };
            assert!(LameEncoder::new(PcmFormat::default(), &settings).is_ok());
        }
        let settings = Settings {
            quality: 10,
            ..Settings::default()
        };
        assert!(matches!(
            LameEncoder::new(PcmFormat::default(), &settings),
            Err(EncoderError::Config(_))
        ));
    }

    #[test]
    fn test_input_alignment() {
        let format = PcmFormat::default();
        assert_eq!(LameEncoderFactory::default().input_alignment(format), 4);
        assert_eq!(PassthroughEncoderFactory.input_alignment(format), 1);
    }

    #[test]
    fn test_unsupported_format() {
        let format = PcmFormat {
            bit_depth: 24,
            ..PcmFormat::default()
        };
        assert!(matches!(
            LameEncoder::new(format, &Settings::default()),
            Err(EncoderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_lame_encodes_odd_sized_writes() {
        let mut encoder = LameEncoderFactory::default()
            .create(PcmFormat::default())
            .unwrap();
        // One second of silence in writes that split sample frames.
        let pcm = vec![0u8; 176_400];
        let mut total = 0;
        for chunk in pcm.chunks(4097) {
            total += encoder.encode(chunk).unwrap().len();
        }
        total += encoder.flush().unwrap().len();
        assert!(total > 0);
    }
}
