//! Individual screen capture strategies

use async_trait::async_trait;
use image::RgbImage;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{error, info};

use super::decode::{decode_png, Encoding, FrameDecoder};
use super::ScreencapMethod;
use crate::argv::{ArgvTemplate, Replacement};
use crate::config::{ControlConfig, TIMING_CONFIG};
use crate::unit::UnitBase;

/// One way of getting a frame off the device
#[async_trait]
pub trait CaptureStrategy: Send {
    fn method(&self) -> ScreencapMethod;

    /// Prepare for frames of `width` x `height`
    async fn init(&mut self, width: u32, height: u32) -> bool;

    async fn deinit(&mut self) {}

    async fn screencap(&mut self) -> Option<RgbImage>;
}

/// Parse every template a strategy needs; missing templates disable it
pub(super) fn parse_templates<const N: usize>(
    config: &ControlConfig,
    names: [&str; N],
) -> Option<[ArgvTemplate; N]> {
    let mut templates = Vec::with_capacity(N);
    for name in names {
        match UnitBase::parse_argv(config, name) {
            Ok(template) => templates.push(template),
            Err(e) => {
                info!("screencap template {} unavailable: {}", name, e);
                return None;
            }
        }
    }
    templates.try_into().ok()
}

/// Raw dump streamed back over a host socket with `nc`
pub struct RawByNetcat {
    base: UnitBase,
    screencap_argv: ArgvTemplate,
    netcat_address_argv: ArgvTemplate,
    decoder: FrameDecoder,
    port: Option<u16>,
}

impl RawByNetcat {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Option<Self> {
        let [screencap_argv, netcat_address_argv] =
            parse_templates(config, ["ScreencapRawByNetcat", "NetcatAddress"])?;
        Some(Self {
            base,
            screencap_argv,
            netcat_address_argv,
            decoder: FrameDecoder::default(),
            port: None,
        })
    }

    async fn request_netcat_address(&self) -> Option<String> {
        let argv = self.base.gen(&self.netcat_address_argv, Replacement::new())?;
        let output = self.base.run(argv).await?;
        let text = String::from_utf8_lossy(&output);

        match text.split_once(' ') {
            Some((address, _)) if !address.trim().is_empty() => Some(address.trim().to_string()),
            _ => {
                error!("no netcat address in {:?}", text);
                None
            }
        }
    }

    /// Host part of a network serial, or loopback for USB serials
    fn local_address(&self) -> String {
        self.base
            .replacement()
            .get("ADB_SERIAL")
            .and_then(|serial| serial.split_once(':'))
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }
}

#[async_trait]
impl CaptureStrategy for RawByNetcat {
    fn method(&self) -> ScreencapMethod {
        ScreencapMethod::RawByNetcat
    }

    async fn init(&mut self, width: u32, height: u32) -> bool {
        self.decoder.set_size(width, height);

        let Some(address) = self.request_netcat_address().await else {
            return false;
        };

        let local = self.local_address();
        let port = match self.base.transport().open_socket(&local).await {
            Ok(port) => port,
            Err(e) => {
                error!("failed to open capture socket on {}: {}", local, e);
                return false;
            }
        };
        info!("netcat address: {}, port: {}", address, port);

        self.base.merge_replacement(
            [
                ("NETCAT_ADDRESS", address),
                ("NETCAT_PORT", port.to_string()),
            ]
            .into_iter()
            .collect(),
            true,
        );
        self.port = Some(port);
        true
    }

    async fn deinit(&mut self) {
        if self.port.take().is_some() {
            self.base.transport().close_socket().await;
        }
    }

    async fn screencap(&mut self) -> Option<RgbImage> {
        if self.port.is_none() {
            return None;
        }
        let argv = self.base.gen(&self.screencap_argv, Replacement::new())?;
        let data = self
            .base
            .command(argv, true, TIMING_CONFIG.default_timeout())
            .await?;
        self.decoder.process_data(data, Encoding::Raw)
    }
}

/// Raw dump compressed on the device with `gzip`
pub struct RawWithGzip {
    base: UnitBase,
    screencap_argv: ArgvTemplate,
    decoder: FrameDecoder,
}

impl RawWithGzip {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Option<Self> {
        let [screencap_argv] = parse_templates(config, ["ScreencapRawWithGzip"])?;
        Some(Self {
            base,
            screencap_argv,
            decoder: FrameDecoder::default(),
        })
    }
}

#[async_trait]
impl CaptureStrategy for RawWithGzip {
    fn method(&self) -> ScreencapMethod {
        ScreencapMethod::RawWithGzip
    }

    async fn init(&mut self, width: u32, height: u32) -> bool {
        self.decoder.set_size(width, height);
        true
    }

    async fn screencap(&mut self) -> Option<RgbImage> {
        let argv = self.base.gen(&self.screencap_argv, Replacement::new())?;
        let data = self.base.run(argv).await?;
        self.decoder.process_data(data, Encoding::Gzip)
    }
}

/// PNG encoded on the device and streamed over stdout
pub struct Encode {
    base: UnitBase,
    screencap_argv: ArgvTemplate,
    decoder: FrameDecoder,
}

impl Encode {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Option<Self> {
        let [screencap_argv] = parse_templates(config, ["ScreencapEncode"])?;
        Some(Self {
            base,
            screencap_argv,
            decoder: FrameDecoder::default(),
        })
    }
}

#[async_trait]
impl CaptureStrategy for Encode {
    fn method(&self) -> ScreencapMethod {
        ScreencapMethod::Encode
    }

    async fn init(&mut self, width: u32, height: u32) -> bool {
        self.decoder.set_size(width, height);
        true
    }

    async fn screencap(&mut self) -> Option<RgbImage> {
        let argv = self.base.gen(&self.screencap_argv, Replacement::new())?;
        let data = self.base.run(argv).await?;
        self.decoder.process_data(data, Encoding::Png)
    }
}

/// PNG written to a device file, then pulled to the host
pub struct EncodeToFileAndPull {
    base: UnitBase,
    encode_argv: ArgvTemplate,
    pull_argv: ArgvTemplate,
    host_dir: Option<TempDir>,
}

impl EncodeToFileAndPull {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Option<Self> {
        let [encode_argv, pull_argv] =
            parse_templates(config, ["ScreencapEncodeToFile", "PullFile"])?;
        Some(Self {
            base,
            encode_argv,
            pull_argv,
            host_dir: None,
        })
    }

    fn dst_path(&self) -> Option<PathBuf> {
        let temp_file = self.base.replacement().get("TEMP_FILE")?;
        Some(self.host_dir.as_ref()?.path().join(temp_file))
    }
}

#[async_trait]
impl CaptureStrategy for EncodeToFileAndPull {
    fn method(&self) -> ScreencapMethod {
        ScreencapMethod::EncodeToFileAndPull
    }

    async fn init(&mut self, _width: u32, _height: u32) -> bool {
        let host_dir = match tempfile::Builder::new().prefix("droidctl-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                error!("failed to create host temp dir: {}", e);
                return false;
            }
        };

        let temp_file = format!("droidctl_{}.png", uuid::Uuid::new_v4().simple());
        let dst_path = host_dir.path().join(&temp_file);
        self.base.merge_replacement(
            [
                ("TEMP_FILE", temp_file),
                ("DST_PATH", dst_path.to_string_lossy().into_owned()),
            ]
            .into_iter()
            .collect(),
            true,
        );
        self.host_dir = Some(host_dir);
        true
    }

    async fn deinit(&mut self) {
        self.host_dir = None;
    }

    async fn screencap(&mut self) -> Option<RgbImage> {
        let dst_path = self.dst_path()?;

        let argv = self.base.gen(&self.encode_argv, Replacement::new())?;
        self.base.run(argv).await?;

        let argv = self.base.gen(&self.pull_argv, Replacement::new())?;
        self.base.run(argv).await?;

        let data = match tokio::fs::read(&dst_path).await {
            Ok(data) => data,
            Err(e) => {
                error!("failed to read pulled file {}: {}", dst_path.display(), e);
                return None;
            }
        };
        decode_png(&data)
    }
}
