//! Builds the full set of protocol units for one device

use std::str::FromStr;
use std::sync::Arc;

use super::{
    Activity, Connection, DeviceInfo, MinitouchInput, Screencap, TapInput, TouchInput, UnitBase,
};
use crate::argv::Replacement;
use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::transport::Transport;

/// Touch backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TouchKind {
    /// One `input` command per gesture
    #[default]
    Tap,
    /// Interactive minitouch session
    Minitouch,
}

impl FromStr for TouchKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tap" | "adb" => Ok(TouchKind::Tap),
            "minitouch" => Ok(TouchKind::Minitouch),
            other => Err(ControlError::Template(format!("unknown touch backend: {}", other))),
        }
    }
}

/// Every unit a controller drives, sharing one transport
pub struct ControlUnits {
    pub connection: Connection,
    pub device_info: DeviceInfo,
    pub activity: Activity,
    pub touch_input: TouchInput,
    pub screencap: Screencap,
}

impl ControlUnits {
    /// Parse all units from `config`, seeding `{ADB}` and `{ADB_SERIAL}`
    pub fn from_config(
        config: &ControlConfig,
        adb_path: &str,
        adb_serial: &str,
        touch: TouchKind,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let replacement: Replacement = [("ADB", adb_path), ("ADB_SERIAL", adb_serial)]
            .into_iter()
            .collect();
        let mut base = UnitBase::new(transport);
        base.set_replacement(replacement);

        let touch_input = match touch {
            TouchKind::Tap => TouchInput::Tap(TapInput::parse(base.clone(), config)?),
            TouchKind::Minitouch => {
                TouchInput::Minitouch(MinitouchInput::parse(base.clone(), config)?)
            }
        };

        Ok(Self {
            connection: Connection::parse(base.clone(), config)?,
            device_info: DeviceInfo::parse(base.clone(), config)?,
            activity: Activity::parse(base.clone(), config)?,
            screencap: Screencap::parse(base, config)?,
            touch_input,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Reply, ScriptedTransport};

    #[test]
    fn test_touch_kind_from_str() {
        assert_eq!("minitouch".parse::<TouchKind>().unwrap(), TouchKind::Minitouch);
        assert_eq!("Tap".parse::<TouchKind>().unwrap(), TouchKind::Tap);
        assert!("maatouch".parse::<TouchKind>().is_err());
    }

    #[tokio::test]
    async fn test_units_share_serial() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("connect", Reply::text("connected to 10.0.0.5:5555"))
                .on("android_id", Reply::text("abc123\n")),
        );
        let mut units = ControlUnits::from_config(
            &ControlConfig::default_adb().unwrap(),
            "/usr/bin/adb",
            "10.0.0.5:5555",
            TouchKind::Tap,
            transport.clone(),
        )
        .unwrap();

        assert!(units.connection.connect().await);
        assert_eq!(units.device_info.request_uuid().await.as_deref(), Some("abc123"));
        assert_eq!(units.touch_input.kind(), TouchKind::Tap);

        for call in transport.calls() {
            assert_eq!(call[0], "/usr/bin/adb");
            assert!(call.contains(&"10.0.0.5:5555".to_string()));
        }
    }

    #[test]
    fn test_missing_required_command_fails() {
        let config = ControlConfig::from_json_str(r#"{"command": {"Connect": ["adb"]}}"#).unwrap();
        let result = ControlUnits::from_config(
            &config,
            "adb",
            "emulator-5554",
            TouchKind::Tap,
            Arc::new(ScriptedTransport::new()),
        );
        assert!(matches!(result, Err(ControlError::MissingCommand(_))));
    }
}
