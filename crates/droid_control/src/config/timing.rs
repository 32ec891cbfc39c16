//! Timing configuration for device commands and sessions

use lazy_static::lazy_static;
use std::env;
use std::time::Duration;

fn env_secs(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Timeouts applied to one-shot transport commands
#[derive(Debug, Clone)]
pub struct CommandTimingConfig {
    pub default_timeout: f64,
    pub connect_timeout: f64,
    pub kill_server_timeout: f64,
}

impl Default for CommandTimingConfig {
    fn default() -> Self {
        Self {
            default_timeout: env_secs("DROIDCTL_COMMAND_TIMEOUT", 20.0),
            connect_timeout: env_secs("DROIDCTL_CONNECT_TIMEOUT", 60.0),
            kill_server_timeout: env_secs("DROIDCTL_KILL_SERVER_TIMEOUT", 60.0),
        }
    }
}

/// Timing for socket and stream based screen capture
#[derive(Debug, Clone)]
pub struct ScreencapTimingConfig {
    pub socket_accept_timeout: f64,
    /// Deadline for a streaming minicap to report that it is allocating frames
    pub minicap_startup_timeout: f64,
    /// Deadline for one complete frame on the minicap stream
    pub minicap_frame_timeout: f64,
    /// Length of a single read window on the minicap process or stream
    pub read_window: f64,
}

impl Default for ScreencapTimingConfig {
    fn default() -> Self {
        Self {
            socket_accept_timeout: env_secs("DROIDCTL_SOCKET_ACCEPT_TIMEOUT", 6.0),
            minicap_startup_timeout: env_secs("DROIDCTL_MINICAP_STARTUP_TIMEOUT", 10.0),
            minicap_frame_timeout: env_secs("DROIDCTL_MINICAP_FRAME_TIMEOUT", 5.0),
            read_window: env_secs("DROIDCTL_SCREENCAP_READ_WINDOW", 0.5),
        }
    }
}

/// Timing for the interactive touch session
#[derive(Debug, Clone)]
pub struct TouchTimingConfig {
    /// Deadline for the `^` calibration line after the binary starts
    pub calibration_timeout: f64,
    /// Length of a single read window on the session's stdout
    pub read_window: f64,
}

impl Default for TouchTimingConfig {
    fn default() -> Self {
        Self {
            calibration_timeout: env_secs("DROIDCTL_TOUCH_CALIBRATION_TIMEOUT", 10.0),
            read_window: env_secs("DROIDCTL_TOUCH_READ_WINDOW", 0.5),
        }
    }
}

/// Master timing configuration
#[derive(Debug, Clone, Default)]
pub struct TimingConfig {
    pub command: CommandTimingConfig,
    pub screencap: ScreencapTimingConfig,
    pub touch: TouchTimingConfig,
}

impl TimingConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command.default_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command.connect_timeout)
    }

    pub fn kill_server_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command.kill_server_timeout)
    }
}

lazy_static! {
    /// Global timing configuration instance
    pub static ref TIMING_CONFIG: TimingConfig = TimingConfig::default();
}
