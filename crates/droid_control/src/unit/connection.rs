//! Device connection and server lifecycle

use tracing::{error, info, warn};

use super::UnitBase;
use crate::argv::{ArgvTemplate, Replacement};
use crate::config::{ControlConfig, TIMING_CONFIG};
use crate::error::Result;

/// Connects to the device and manages the ADB server
pub struct Connection {
    base: UnitBase,
    connect_argv: ArgvTemplate,
    kill_server_argv: ArgvTemplate,
    devices_argv: Option<ArgvTemplate>,
}

impl Connection {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Result<Self> {
        let devices_argv = match config.command.get("Devices") {
            Some(value) => Some(ArgvTemplate::parse(value)?),
            None => None,
        };

        Ok(Self {
            connect_argv: UnitBase::parse_argv(config, "Connect")?,
            kill_server_argv: UnitBase::parse_argv(config, "KillServer")?,
            devices_argv,
            base,
        })
    }

    /// Connect to the configured serial
    ///
    /// Output mentioning `error` or `cannot` counts as failure even when the
    /// command itself exits cleanly.
    pub async fn connect(&self) -> bool {
        let Some(argv) = self.base.gen(&self.connect_argv, Replacement::new()) else {
            return false;
        };
        let Some(output) = self
            .base
            .command(argv, false, TIMING_CONFIG.connect_timeout())
            .await
        else {
            return false;
        };

        let text = String::from_utf8_lossy(&output);
        if text.contains("error") || text.contains("cannot") {
            error!("connect failed: {}", text.trim());
            return false;
        }

        info!("connected: {}", text.trim());
        true
    }

    /// Kill the ADB server; any response counts as success
    pub async fn kill_server(&self) -> bool {
        let Some(argv) = self.base.gen(&self.kill_server_argv, Replacement::new()) else {
            return false;
        };
        self.base
            .command(argv, false, TIMING_CONFIG.kill_server_timeout())
            .await
            .is_some()
    }

    /// Serials of attached devices in `device` state
    pub async fn devices(&self) -> Option<Vec<String>> {
        let Some(template) = &self.devices_argv else {
            warn!("no Devices command configured");
            return None;
        };
        let argv = self.base.gen(template, Replacement::new())?;
        let output = self.base.run(argv).await?;

        Some(parse_devices(&String::from_utf8_lossy(&output)))
    }
}

fn parse_devices(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Reply, ScriptedTransport};
    use std::sync::Arc;

    fn connection(transport: ScriptedTransport) -> Connection {
        let mut base = UnitBase::new(Arc::new(transport));
        base.set_replacement(
            [("ADB", "adb"), ("ADB_SERIAL", "127.0.0.1:5555")]
                .into_iter()
                .collect(),
        );
        Connection::parse(base, &ControlConfig::default_adb().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_connect_success() {
        let conn = connection(
            ScriptedTransport::new().on("connect", Reply::text("connected to 127.0.0.1:5555\n")),
        );
        assert!(conn.connect().await);
    }

    #[tokio::test]
    async fn test_connect_error_text_fails() {
        let conn = connection(ScriptedTransport::new().on(
            "connect",
            Reply::text("cannot connect to 127.0.0.1:5555: Connection refused\n"),
        ));
        assert!(!conn.connect().await);

        let conn = connection(
            ScriptedTransport::new().on("connect", Reply::text("error: device offline\n")),
        );
        assert!(!conn.connect().await);
    }

    #[tokio::test]
    async fn test_kill_server_any_response() {
        let conn = connection(ScriptedTransport::new().on("kill-server", Reply::empty()));
        assert!(conn.kill_server().await);

        let conn = connection(ScriptedTransport::new().on("kill-server", Reply::Fail));
        assert!(!conn.kill_server().await);
    }

    #[tokio::test]
    async fn test_devices() {
        let conn = connection(ScriptedTransport::new().on(
            "devices",
            Reply::text(
                "* daemon started successfully\nList of devices attached\nemulator-5554\tdevice\n127.0.0.1:5555\toffline\nR58M\tdevice\n\n",
            ),
        ));
        assert_eq!(
            conn.devices().await,
            Some(vec!["emulator-5554".to_string(), "R58M".to_string()])
        );
    }

    #[test]
    fn test_parse_without_devices_template() {
        let config = ControlConfig::from_json_str(
            r#"{"command": {"Connect": ["adb", "connect"], "KillServer": ["adb", "kill-server"]}}"#,
        )
        .unwrap();
        let base = UnitBase::new(Arc::new(ScriptedTransport::new()));
        let conn = Connection::parse(base, &config).unwrap();
        assert!(conn.devices_argv.is_none());
    }
}
