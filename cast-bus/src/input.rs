use std::{
    fmt,
    io,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;

use crate::error::{CastError, Result};

/// Read size used when a source is built from a byte reader.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

pub type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A live, push-based raw PCM byte stream. Not seekable, not replayable.
pub struct AudioSource {
    name: String,
    inner: ChunkStream,
}

impl AudioSource {
    pub fn from_stream<S>(name: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            name: name.into(),
            inner: Box::pin(stream),
        }
    }

    pub fn from_reader<R>(name: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::from_stream(name, ReaderStream::with_capacity(reader, READ_CHUNK_SIZE))
    }

    pub fn stdin() -> Self {
        Self::from_reader("stdin", tokio::io::stdin())
    }

    /// Opens a raw PCM file as a source.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| CastError::InvalidSource(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_reader(path.display().to_string(), file))
    }

    /// Throttles the source so bytes come out no faster than `bytes_per_sec`.
    ///
    /// The clock starts at the first chunk, so a source that is created long
    /// before it is attached does not burst to catch up.
    pub fn paced(self, bytes_per_sec: u64) -> Self {
        if bytes_per_sec == 0 {
            return self;
        }
        let name = self.name;
        let stream = futures::stream::unfold(
            (self.inner, None::<Instant>, 0u64),
            move |(mut inner, start, sent)| async move {
                let item = inner.next().await?;
                let start = start.unwrap_or_else(Instant::now);
                let sent = match &item {
                    Ok(chunk) => sent + chunk.len() as u64,
                    Err(_) => sent,
                };
                let due = start + Duration::from_secs_f64(sent as f64 / bytes_per_sec as f64);
                tokio::time::sleep_until(due).await;
                Some((item, (inner, Some(start), sent)))
            },
        );
        Self::from_stream(name, stream)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Stream for AudioSource {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSource").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_source_yields_all_bytes() -> anyhow::Result<()> {
        let data: Vec<u8> = (0..50_000u32).map(|i| i as u8).collect();
        let mut source = AudioSource::from_reader("mem", std::io::Cursor::new(data.clone()));
        assert_eq!(source.name(), "mem");

        let mut out = Vec::new();
        while let Some(chunk) = source.next().await {
            out.extend_from_slice(&chunk?);
        }
        assert_eq!(out, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_missing_file_is_invalid_source() {
        let err = AudioSource::open("/definitely/not/here.pcm").await.unwrap_err();
        assert!(matches!(err, CastError::InvalidSource(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_source_follows_byte_rate() -> anyhow::Result<()> {
        let chunks = (0..4).map(|_| Ok(Bytes::from(vec![0u8; 1000])));
        let mut source =
            AudioSource::from_stream("paced", futures::stream::iter(chunks)).paced(1000);

        let start = Instant::now();
        let mut count = 0;
        while let Some(chunk) = source.next().await {
            chunk?;
            count += 1;
        }
        assert_eq!(count, 4);
        assert!(start.elapsed() >= Duration::from_secs(4));
        Ok(())
    }
}
