//! droid_control: Android device control over templated adb commands
//!
//! This library provides:
//! - Command templates with `{PLACEHOLDER}` substitution, loaded from JSON
//! - Subprocess transport with timeouts, socket receive, interactive sessions
//!   and TCP streams
//! - Protocol units for connection, device info, activities, touch and screencap
//! - Screencap strategy selection by speed test, including minicap, with
//!   CRLF-mangled stream repair
//! - A minitouch touch session
//! - An ordered async action queue and a controller façade with events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use droid_control::{
//!     ControlConfig, ControlUnits, Controller, ControllerOptions, ProcessTransport, TouchKind,
//! };
//!
//! #[tokio::main]
//! async fn main() -> droid_control::Result<()> {
//!     let units = ControlUnits::from_config(
//!         &ControlConfig::default_adb()?,
//!         "adb",
//!         "127.0.0.1:5555",
//!         TouchKind::Tap,
//!         Arc::new(ProcessTransport::new()),
//!     )?;
//!     let controller = Controller::new(units, ControllerOptions::default());
//!
//!     let id = controller.post_connection();
//!     println!("connect: {:?}", controller.wait(id).await);
//!     if let Some(frame) = controller.screencap().await {
//!         println!("frame: {}x{}", frame.width(), frame.height());
//!     }
//!     Ok(())
//! }
//! ```

pub mod action_queue;
pub mod argv;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod frame_saver;
pub mod transport;
pub mod unit;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{ControlError, Result};

pub use action_queue::{ActionId, ActionQueue, ActionStatus};
pub use argv::{ArgvTemplate, Replacement};
pub use config::{ControlConfig, TimingConfig, TIMING_CONFIG};
pub use controller::{
    Action, Controller, ControllerArena, ControllerEvent, ControllerHandle, ControllerOptions,
    Rect, TargetSize,
};
pub use frame::CapturedFrame;
pub use frame_saver::FrameSaver;
pub use transport::{InteractiveChannel, ProcessTransport, TcpChannel, Transport};
pub use unit::{ControlUnits, Resolution, ScreencapMethod, SwipeStep, TouchKind};
