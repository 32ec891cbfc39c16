//! Device identity, orientation and resolution queries

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info};

use super::UnitBase;
use crate::argv::{ArgvTemplate, Replacement};
use crate::config::ControlConfig;
use crate::error::Result;

lazy_static! {
    static ref INTEGER: Regex = Regex::new(r"\d+").expect("integer pattern is valid");
}

/// Screen size in device pixels, already adjusted for orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

/// Last successfully queried device facts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfoSnapshot {
    pub uuid: Option<String>,
    pub resolution: Option<Resolution>,
    pub orientation: Option<i32>,
}

/// Queries static and slowly-changing device properties
pub struct DeviceInfo {
    base: UnitBase,
    uuid_argv: ArgvTemplate,
    resolution_argv: ArgvTemplate,
    orientation_argv: ArgvTemplate,
    snapshot: DeviceInfoSnapshot,
}

impl DeviceInfo {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Result<Self> {
        Ok(Self {
            uuid_argv: UnitBase::parse_argv(config, "UUID")?,
            resolution_argv: UnitBase::parse_argv(config, "Resolution")?,
            orientation_argv: UnitBase::parse_argv(config, "Orientation")?,
            snapshot: DeviceInfoSnapshot::default(),
            base,
        })
    }

    pub fn snapshot(&self) -> &DeviceInfoSnapshot {
        &self.snapshot
    }

    pub fn uuid(&self) -> Option<&str> {
        self.snapshot.uuid.as_deref()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.snapshot.resolution
    }

    pub fn orientation(&self) -> Option<i32> {
        self.snapshot.orientation
    }

    /// Query the device identifier, keeping only ASCII letters and digits
    pub async fn request_uuid(&mut self) -> Option<String> {
        let argv = self.base.gen(&self.uuid_argv, Replacement::new())?;
        let output = self.base.run(argv).await?;

        let uuid: String = String::from_utf8_lossy(&output)
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        if uuid.is_empty() {
            error!("empty uuid");
            return None;
        }

        info!("uuid: {}", uuid);
        self.snapshot.uuid = Some(uuid.clone());
        Some(uuid)
    }

    /// Query the display rotation, one of `0..=3`
    pub async fn request_orientation(&mut self) -> Option<i32> {
        let argv = self.base.gen(&self.orientation_argv, Replacement::new())?;
        let output = self.base.run(argv).await?;

        let orientation = match output.first() {
            Some(c @ b'0'..=b'3') => i32::from(c - b'0'),
            _ => {
                error!(
                    "invalid orientation output: {:?}",
                    String::from_utf8_lossy(&output)
                );
                return None;
            }
        };

        info!("orientation: {}", orientation);
        self.snapshot.orientation = Some(orientation);
        Some(orientation)
    }

    /// Query the screen size and orient it by the current rotation
    pub async fn request_resolution(&mut self) -> Option<Resolution> {
        let orientation = self.request_orientation().await?;

        let argv = self.base.gen(&self.resolution_argv, Replacement::new())?;
        let output = self.base.run(argv).await?;
        let text = String::from_utf8_lossy(&output);

        let numbers: Vec<i32> = INTEGER
            .find_iter(&text)
            .filter_map(|m| m.as_str().parse().ok())
            .take(2)
            .collect();
        let &[a, b] = numbers.as_slice() else {
            error!("invalid resolution output: {:?}", text);
            return None;
        };

        let resolution = orient(a, b, orientation);
        info!(
            "resolution: {}x{}, orientation: {}",
            resolution.width, resolution.height, orientation
        );
        self.snapshot.resolution = Some(resolution);
        Some(resolution)
    }
}

/// Rotations 0 and 2 report landscape-like sizes, 1 and 3 portrait-like
fn orient(a: i32, b: i32, orientation: i32) -> Resolution {
    let (long, short) = (a.max(b), a.min(b));
    match orientation {
        1 | 3 => Resolution {
            width: short,
            height: long,
        },
        _ => Resolution {
            width: long,
            height: short,
        },
    }
}
