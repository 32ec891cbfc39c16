//! Configuration module for droid_control
//!
//! This module contains:
//! - `adb`: command templates and prebuilt binaries for ADB control units
//! - `timing`: timeouts for device commands and sessions

mod adb;
mod timing;

pub use adb::{
    ControlConfig, MinicapPrebuilt, MinitouchPrebuilt, PrebuiltConfig, DEFAULT_ADB_CONFIG,
    DEFAULT_MINICAP_ARCHS, DEFAULT_MINICAP_SDKS, DEFAULT_MINITOUCH_ARCHS,
};
pub use timing::{
    CommandTimingConfig, ScreencapTimingConfig, TimingConfig, TouchTimingConfig, TIMING_CONFIG,
};
