//! Screen capture through a pushed minicap binary
//!
//! Both strategies deploy `minicap` and the `minicap.so` built for the
//! device's ABI and SDK level. `MinicapDirect` runs one `-s` shot per frame;
//! `MinicapStream` keeps minicap running and reads frames from its socket,
//! forwarded to a host port:
//!
//! ```text
//! banner: version u8, size u8, pid u32, real w/h u32, virtual w/h u32,
//!         orientation u8, quirks u8            (little endian, `size` bytes)
//! frame:  length u32, JPEG bytes
//! ```

use async_trait::async_trait;
use image::RgbImage;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::decode::{decode_jpeg, Encoding, FrameDecoder};
use super::methods::{parse_templates, CaptureStrategy};
use super::ScreencapMethod;
use crate::argv::{ArgvTemplate, Replacement};
use crate::config::{ControlConfig, MinicapPrebuilt, TIMING_CONFIG};
use crate::error::{ControlError, Result};
use crate::transport::InteractiveChannel;
use crate::unit::{InvokeApp, UnitBase};

/// minicap loads its library by this name from `LD_LIBRARY_PATH`
const LIBRARY_NAME: &str = "minicap.so";
const FORWARD_PORT: u16 = 1313;
const LOCAL_SOCKET: &str = "minicap";
/// Printed once the encoder is ready to serve clients
const STARTUP_MARKER: &str = "Allocating";
const BANNER_SIZE: usize = 24;
const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Binary and library deployment shared by both minicap strategies
struct MinicapDeploy {
    binary: InvokeApp,
    library: InvokeApp,
    prebuilt: MinicapPrebuilt,
    width: u32,
    height: u32,
}

impl MinicapDeploy {
    fn parse(base: UnitBase, config: &ControlConfig) -> Option<Self> {
        let Some(prebuilt) = config.prebuilt.minicap.clone() else {
            info!("minicap prebuilt is not configured");
            return None;
        };

        let binary = match InvokeApp::parse(base.clone(), config) {
            Ok(binary) => binary,
            Err(e) => {
                info!("minicap unavailable: {}", e);
                return None;
            }
        };
        if !binary.has_sdk() {
            info!("minicap unavailable: SDK command is not configured");
            return None;
        }
        let library = InvokeApp::parse(base, config).ok()?;

        Some(Self {
            binary,
            library,
            prebuilt,
            width: 0,
            height: 0,
        })
    }

    /// Push the binary and the library matching the device
    async fn deploy(&mut self, width: u32, height: u32) -> bool {
        self.width = width;
        self.height = height;

        if !self.binary.init() || !self.library.init_with_name(LIBRARY_NAME) {
            return false;
        }

        let Some(abis) = self.binary.abilist().await else {
            return false;
        };
        let Some(sdk) = self.binary.sdk().await else {
            return false;
        };

        let Some(arch) = abis.iter().find(|abi| self.prebuilt.arch.contains(abi)) else {
            error!("no minicap build for abis {:?}", abis);
            return false;
        };
        let Some(fit_sdk) = self.prebuilt.fit_sdk(sdk) else {
            error!("no minicap library for sdk {}", sdk);
            return false;
        };
        let (Some(binary), Some(library)) = (
            self.prebuilt.binary_for(arch),
            self.prebuilt.library_for(arch, fit_sdk),
        ) else {
            error!("minicap root is not configured");
            return false;
        };
        info!(
            "minicap arch: {}, sdk: {} (device {}), binary: {}, library: {}",
            arch,
            fit_sdk,
            sdk,
            binary.display(),
            library.display()
        );

        self.binary.push(&binary).await
            && self.library.push(&library).await
            && self.binary.chmod().await
            && self.library.chmod().await
    }

    /// `-P` argument: real and virtual size, no rotation
    fn projection(&self) -> String {
        format!("{w}x{h}@{w}x{h}/0", w = self.width, h = self.height)
    }
}

/// One `minicap -s` run per frame, JPEG on stdout
pub struct MinicapDirect {
    deploy: MinicapDeploy,
    decoder: FrameDecoder,
    ready: bool,
}

impl MinicapDirect {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Option<Self> {
        Some(Self {
            deploy: MinicapDeploy::parse(base, config)?,
            decoder: FrameDecoder::default(),
            ready: false,
        })
    }
}

#[async_trait]
impl CaptureStrategy for MinicapDirect {
    fn method(&self) -> ScreencapMethod {
        ScreencapMethod::MinicapDirect
    }

    async fn init(&mut self, width: u32, height: u32) -> bool {
        self.decoder.set_size(width, height);
        self.ready = self.deploy.deploy(width, height).await;
        self.ready
    }

    async fn deinit(&mut self) {
        self.ready = false;
    }

    async fn screencap(&mut self) -> Option<RgbImage> {
        if !self.ready {
            return None;
        }
        let extra = format!("-P {} -s", self.deploy.projection());
        let data = self.deploy.binary.invoke_bin_stdout(&extra).await?;
        self.decoder.process_data(data, Encoding::MinicapJpeg)
    }
}

/// Long-running minicap serving frames on a forwarded socket
pub struct MinicapStream {
    deploy: MinicapDeploy,
    base: UnitBase,
    forward_argv: ArgvTemplate,
    process: Option<Box<dyn InteractiveChannel>>,
    stream: Option<FrameStream>,
}

impl MinicapStream {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Option<Self> {
        let [forward_argv] = parse_templates(config, ["ForwardSocket"])?;
        Some(Self {
            deploy: MinicapDeploy::parse(base.clone(), config)?,
            base,
            forward_argv,
            process: None,
            stream: None,
        })
    }

    async fn forward(&mut self) -> bool {
        self.base.merge_replacement(
            [
                ("FOWARD_PORT", FORWARD_PORT.to_string()),
                ("LOCAL_SOCKET", LOCAL_SOCKET.to_string()),
            ]
            .into_iter()
            .collect(),
            true,
        );
        let Some(argv) = self.base.gen(&self.forward_argv, Replacement::new()) else {
            return false;
        };
        self.base.run(argv).await.is_some()
    }

    /// Connect to the forwarded socket and consume the banner
    async fn open_stream(&mut self) -> Result<FrameStream> {
        // adb forward listens on the host running adb
        let channel = self
            .base
            .transport()
            .connect("127.0.0.1", FORWARD_PORT)
            .await?;
        let mut stream = FrameStream::new(channel);

        let timeout = Duration::from_secs_f64(TIMING_CONFIG.screencap.minicap_frame_timeout);
        let banner = MinicapBanner::parse(&stream.take(BANNER_SIZE, timeout).await?)?;
        info!(
            "minicap pid: {}, real: {}x{}, virtual: {}x{}, orientation: {}, quirks: {:#x}",
            banner.pid,
            banner.real_width,
            banner.real_height,
            banner.virtual_width,
            banner.virtual_height,
            banner.orientation,
            banner.quirks
        );

        if (banner.virtual_width, banner.virtual_height) != (self.deploy.width, self.deploy.height) {
            warn!(
                "minicap serves {}x{}, expected {}x{}",
                banner.virtual_width, banner.virtual_height, self.deploy.width, self.deploy.height
            );
        }
        if usize::from(banner.size) > BANNER_SIZE {
            stream
                .take(usize::from(banner.size) - BANNER_SIZE, timeout)
                .await?;
        }
        Ok(stream)
    }

    async fn next_frame(&mut self) -> Result<RgbImage> {
        let stream = self.stream.as_mut().ok_or(ControlError::ChannelClosed)?;
        let timeout = Duration::from_secs_f64(TIMING_CONFIG.screencap.minicap_frame_timeout);

        let header = stream.take(4, timeout).await?;
        let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if size == 0 || size > MAX_FRAME_SIZE {
            return Err(ControlError::Protocol(format!("bad minicap frame size {}", size)));
        }

        let data = stream.take(size, timeout).await?;
        decode_jpeg(&data)
            .ok_or_else(|| ControlError::Protocol("undecodable minicap frame".to_string()))
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.channel.close().await;
        }
        if let Some(mut process) = self.process.take() {
            process.close().await;
            info!("minicap stream closed");
        }
    }
}

#[async_trait]
impl CaptureStrategy for MinicapStream {
    fn method(&self) -> ScreencapMethod {
        ScreencapMethod::MinicapStream
    }

    async fn init(&mut self, width: u32, height: u32) -> bool {
        self.close().await;

        if !self.deploy.deploy(width, height).await || !self.forward().await {
            return false;
        }

        let extra = format!("-P {}", self.deploy.projection());
        let Some(mut process) = self.deploy.binary.invoke_bin(&extra).await else {
            return false;
        };

        let timeout = Duration::from_secs_f64(TIMING_CONFIG.screencap.minicap_startup_timeout);
        let window = Duration::from_secs_f64(TIMING_CONFIG.screencap.read_window);
        if let Err(e) = wait_for_marker(process.as_mut(), STARTUP_MARKER, timeout, window).await {
            error!("minicap did not start: {}", e);
            process.close().await;
            return false;
        }

        match self.open_stream().await {
            Ok(stream) => {
                self.process = Some(process);
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                error!("minicap stream unavailable: {}", e);
                process.close().await;
                false
            }
        }
    }

    async fn deinit(&mut self) {
        self.close().await;
    }

    async fn screencap(&mut self) -> Option<RgbImage> {
        self.stream.as_ref()?;

        match self.next_frame().await {
            Ok(image) => Some(image),
            Err(e) => {
                // the stream position is lost
                error!("minicap frame failed: {}", e);
                self.close().await;
                None
            }
        }
    }
}

/// Global header minicap writes once per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MinicapBanner {
    version: u8,
    size: u8,
    pid: u32,
    real_width: u32,
    real_height: u32,
    virtual_width: u32,
    virtual_height: u32,
    orientation: u8,
    quirks: u8,
}

impl MinicapBanner {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BANNER_SIZE {
            return Err(ControlError::Protocol(format!(
                "minicap banner too short: {} bytes",
                bytes.len()
            )));
        }
        let le_u32 = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        let banner = Self {
            version: bytes[0],
            size: bytes[1],
            pid: le_u32(2),
            real_width: le_u32(6),
            real_height: le_u32(10),
            virtual_width: le_u32(14),
            virtual_height: le_u32(18),
            orientation: bytes[22],
            quirks: bytes[23],
        };

        if banner.version != 1 || usize::from(banner.size) < BANNER_SIZE {
            return Err(ControlError::Protocol(format!(
                "unsupported minicap banner, version: {}, size: {}",
                banner.version, banner.size
            )));
        }
        Ok(banner)
    }
}

/// Exact-length reads over a chunked channel
struct FrameStream {
    channel: Box<dyn InteractiveChannel>,
    buffer: Vec<u8>,
}

impl FrameStream {
    fn new(channel: Box<dyn InteractiveChannel>) -> Self {
        Self {
            channel,
            buffer: Vec::new(),
        }
    }

    /// Return exactly `len` bytes, keeping any surplus for the next call
    async fn take(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let window = Duration::from_secs_f64(TIMING_CONFIG.screencap.read_window);
        let deadline = Instant::now() + timeout;

        while self.buffer.len() < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ControlError::Timeout(format!(
                    "got {} of {} bytes within {:?}",
                    self.buffer.len(),
                    len,
                    timeout
                )));
            }
            let chunk = self.channel.read(window.min(remaining)).await?;
            self.buffer.extend_from_slice(&chunk);
        }

        let rest = self.buffer.split_off(len);
        Ok(std::mem::replace(&mut self.buffer, rest))
    }
}

/// Read process output until `marker` shows up
async fn wait_for_marker(
    channel: &mut dyn InteractiveChannel,
    marker: &str,
    timeout: Duration,
    window: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut output = String::new();

    while !output.contains(marker) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ControlError::Timeout(format!(
                "no {:?} within {:?}, received: {:?}",
                marker, timeout, output
            )));
        }
        let chunk = channel.read(window.min(remaining)).await?;
        output.push_str(&String::from_utf8_lossy(&chunk));
    }
    Ok(())
}
