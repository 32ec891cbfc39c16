//! Protocol units for ADB-style device control
//!
//! Each unit owns the templates it needs, a shared transport, and its own
//! replacement map. Device operations never return errors: a failed command
//! is logged and surfaces as `false` or `None`.

mod activity;
mod connection;
mod device_info;
mod invoke_app;
mod manager;
mod minitouch;
pub mod screencap;
mod tap_input;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, trace};

use crate::argv::{ArgvTemplate, Replacement};
use crate::config::{ControlConfig, TIMING_CONFIG};
use crate::error::{ControlError, Result};
use crate::transport::Transport;

pub use activity::Activity;
pub use connection::Connection;
pub use device_info::{DeviceInfo, DeviceInfoSnapshot, Resolution};
pub use invoke_app::InvokeApp;
pub use manager::{ControlUnits, TouchKind};
pub use minitouch::MinitouchInput;
pub use screencap::{CaptureStrategy, MinicapDirect, MinicapStream, Screencap, ScreencapMethod};
pub use tap_input::TapInput;

/// Payloads below this size are logged verbatim at trace level
const TRACE_PAYLOAD_LIMIT: usize = 4096;

/// One point of a swipe gesture; `delay` is milliseconds spent at this point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwipeStep {
    pub x: i32,
    pub y: i32,
    pub delay: u64,
}

impl SwipeStep {
    pub fn new(x: i32, y: i32, delay: u64) -> Self {
        Self { x, y, delay }
    }
}

/// State shared by every protocol unit
#[derive(Clone)]
pub struct UnitBase {
    transport: Arc<dyn Transport>,
    replacement: Replacement,
}

impl UnitBase {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            replacement: Replacement::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn replacement(&self) -> &Replacement {
        &self.replacement
    }

    pub fn set_replacement(&mut self, replacement: Replacement) {
        self.replacement = replacement;
    }

    pub fn merge_replacement(&mut self, replacement: Replacement, override_existing: bool) {
        self.replacement.merge(replacement, override_existing);
    }

    /// Parse the template registered under `name`
    pub fn parse_argv(config: &ControlConfig, name: &str) -> Result<ArgvTemplate> {
        ArgvTemplate::parse(config.command(name)?)
    }

    /// Parse the template registered under `name`, `None` when it is not configured
    pub fn parse_optional_argv(config: &ControlConfig, name: &str) -> Result<Option<ArgvTemplate>> {
        match config.command(name) {
            Ok(tokens) => ArgvTemplate::parse(tokens).map(Some),
            Err(ControlError::MissingCommand(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Generate a concrete argv from the unit's replacement plus per-call values.
    ///
    /// Per-call values win over stored ones. A generation failure is logged.
    pub fn gen(&self, template: &ArgvTemplate, extra: Replacement) -> Option<Vec<String>> {
        let mut replacement = self.replacement.clone();
        replacement.merge(extra, true);

        match template.generate(&replacement) {
            Ok(argv) => Some(argv),
            Err(e) => {
                error!("argv generation failed: {}", e);
                None
            }
        }
    }

    /// Run a command with the default timeout
    pub async fn run(&self, argv: Vec<String>) -> Option<Vec<u8>> {
        self.command(argv, false, TIMING_CONFIG.default_timeout())
            .await
    }

    /// Run a command through the transport, logging argv, timing and payload
    pub async fn command(
        &self,
        argv: Vec<String>,
        recv_by_socket: bool,
        timeout: Duration,
    ) -> Option<Vec<u8>> {
        let cmd = argv.join(" ");
        info!("command: {}", cmd);

        let start = Instant::now();
        let result = self.transport.command(&argv, recv_by_socket, timeout).await;
        let duration = start.elapsed();

        match result {
            Ok(output) => {
                info!(
                    "command done, recv_by_socket: {}, size: {}, duration: {:?}",
                    recv_by_socket,
                    output.len(),
                    duration
                );
                if !output.is_empty() && output.len() < TRACE_PAYLOAD_LIMIT {
                    trace!("output:\n{}", String::from_utf8_lossy(&output));
                }
                Some(output)
            }
            Err(e) => {
                error!("command failed: {}, error: {}, duration: {:?}", cmd, e, duration);
                None
            }
        }
    }
}

/// Touch backend selected at build time
pub enum TouchInput {
    Tap(TapInput),
    Minitouch(MinitouchInput),
}

impl TouchInput {
    pub fn kind(&self) -> TouchKind {
        match self {
            TouchInput::Tap(_) => TouchKind::Tap,
            TouchInput::Minitouch(_) => TouchKind::Minitouch,
        }
    }

    /// Prepare the backend for a `width` x `height` screen
    pub async fn init(&mut self, width: i32, height: i32) -> bool {
        match self {
            TouchInput::Tap(_) => true,
            TouchInput::Minitouch(m) => m.init(width, height).await,
        }
    }

    pub async fn deinit(&mut self) {
        if let TouchInput::Minitouch(m) = self {
            m.deinit().await;
        }
    }

    pub async fn click(&mut self, x: i32, y: i32) -> bool {
        match self {
            TouchInput::Tap(t) => t.click(x, y).await,
            TouchInput::Minitouch(m) => m.click(x, y).await,
        }
    }

    pub async fn swipe(&mut self, steps: &[SwipeStep]) -> bool {
        match self {
            TouchInput::Tap(t) => t.swipe(steps).await,
            TouchInput::Minitouch(m) => m.swipe(steps).await,
        }
    }

    pub async fn press_key(&mut self, key: i32) -> bool {
        match self {
            TouchInput::Tap(t) => t.press_key(key).await,
            TouchInput::Minitouch(m) => m.press_key(key).await,
        }
    }
}
