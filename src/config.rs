use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, LazyLock},
};

use anyhow::Context;
use cast_bus::{
    EncoderFactory, LameEncoderFactory, PassthroughEncoderFactory, bus::DEFAULT_NAME,
    encoder::Settings,
};

use crate::server::ServerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Mp3,
    Passthrough,
}

impl FromStr for EncoderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(EncoderKind::Mp3),
            "passthrough" | "none" => Ok(EncoderKind::Passthrough),
            other => Err(anyhow::anyhow!("unknown encoder {:?}", other)),
        }
    }
}

pub struct CastConfig {
    name: String,
    bind: IpAddr,
    port: Option<u16>,
    public_host: Option<String>,
    input: Option<PathBuf>,
    encoder: EncoderKind,
    bitrate_kbps: u32,
    quality: u8,
    realtime: bool,
}

impl CastConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = match get("LITE_CAST_BIND") {
            Some(v) => v.trim().parse().context("LITE_CAST_BIND")?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let port = get("LITE_CAST_PORT")
            .map(|v| v.trim().parse::<u16>())
            .transpose()
            .context("LITE_CAST_PORT")?;
        let encoder = get("LITE_CAST_ENCODER")
            .map(|v| v.parse::<EncoderKind>())
            .transpose()?
            .unwrap_or(EncoderKind::Mp3);
        let bitrate_kbps = get("LITE_CAST_BITRATE")
            .map(|v| v.trim().parse::<u32>())
            .transpose()
            .context("LITE_CAST_BITRATE")?
            .unwrap_or(Settings::default().bitrate_kbps);
        let quality = get("LITE_CAST_QUALITY")
            .map(|v| v.trim().parse::<u8>())
            .transpose()
            .context("LITE_CAST_QUALITY")?
            .unwrap_or(Settings::default().quality);
        anyhow::ensure!(quality <= 9, "LITE_CAST_QUALITY must be 0 to 9, got {}", quality);
        let input = get("LITE_CAST_INPUT").map(PathBuf::from);
        let realtime = match get("LITE_CAST_REALTIME") {
            Some(v) => parse_flag(&v).context("LITE_CAST_REALTIME")?,
            None => input.is_some(),
        };

        Ok(Self {
            name: get("LITE_CAST_NAME").unwrap_or_else(|| DEFAULT_NAME.to_string()),
            bind,
            port,
            public_host: get("LITE_CAST_PUBLIC_HOST"),
            input,
            encoder,
            bitrate_kbps,
            quality,
            realtime,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn input(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    pub fn encoder(&self) -> EncoderKind {
        self.encoder
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn realtime(&self) -> bool {
        self.realtime
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            name: self.name.clone(),
            bind: self.bind,
            public_host: self.public_host.clone(),
        }
    }

    pub fn encoder_factory(&self) -> Arc<dyn EncoderFactory> {
        match self.encoder {
            EncoderKind::Mp3 => Arc::new(LameEncoderFactory::new(Settings {
                bitrate_kbps: self.bitrate_kbps,
                quality: self.quality,
            })),
            EncoderKind::Passthrough => Arc::new(PassthroughEncoderFactory),
        }
    }
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("expected a boolean, got {:?}", other)),
    }
}

pub fn config() -> &'static CastConfig {
    static CONFIG: LazyLock<CastConfig> = LazyLock::new(|| {
        CastConfig::from_env().unwrap_or_else(|e| {
            eprintln!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}
