//! Interactive touch session over the minitouch line protocol
//!
//! The binary prints a calibration line on startup:
//!
//! ```text
//! ^ <max contacts> <max x> <max y> <max pressure>
//! ```
//!
//! after which every gesture is a sequence of `d`/`m`/`u`/`k` commands, each
//! batch committed with `c`.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{InvokeApp, SwipeStep, UnitBase};
use crate::config::{ControlConfig, MinitouchPrebuilt, TIMING_CONFIG};
use crate::error::{ControlError, Result};
use crate::transport::InteractiveChannel;

/// Device limits announced by the `^` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Calibration {
    contacts: i32,
    max_x: i32,
    max_y: i32,
    max_pressure: i32,
}

struct TouchSession {
    channel: Box<dyn InteractiveChannel>,
    width: i32,
    height: i32,
    xscale: f64,
    yscale: f64,
    pressure: i32,
}

impl TouchSession {
    fn scale(&self, x: i32, y: i32) -> (i32, i32) {
        let (x, y) = if x < 0 || x >= self.width || y < 0 || y >= self.height {
            let clamped = (x.clamp(0, self.width - 1), y.clamp(0, self.height - 1));
            warn!(
                "touch point ({}, {}) out of {}x{}, clamped to {:?}",
                x, y, self.width, self.height, clamped
            );
            clamped
        } else {
            (x, y)
        };

        (
            (f64::from(x) * self.xscale).round() as i32,
            (f64::from(y) * self.yscale).round() as i32,
        )
    }

    async fn write(&mut self, data: &str) -> bool {
        match self.channel.write(data).await {
            Ok(()) => true,
            Err(e) => {
                error!("minitouch write failed: {}", e);
                false
            }
        }
    }
}

/// Touch backend driving a pushed minitouch binary
pub struct MinitouchInput {
    invoke_app: InvokeApp,
    prebuilt: MinitouchPrebuilt,
    session: Option<TouchSession>,
}

impl MinitouchInput {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Result<Self> {
        Ok(Self {
            invoke_app: InvokeApp::parse(base, config)?,
            prebuilt: config.prebuilt.minitouch.clone(),
            session: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Deploy the binary, start it and read its calibration
    pub async fn init(&mut self, width: i32, height: i32) -> bool {
        if width <= 0 || height <= 0 {
            error!("invalid screen size {}x{}", width, height);
            return false;
        }
        self.deinit().await;

        if !self.invoke_app.init() {
            return false;
        }

        let Some(abis) = self.invoke_app.abilist().await else {
            return false;
        };
        let Some(arch) = abis.iter().find(|abi| self.prebuilt.arch.contains(abi)) else {
            error!("no supported abi in {:?}", abis);
            return false;
        };
        let Some(binary) = self.prebuilt.binary_for(arch) else {
            error!("minitouch root is not configured");
            return false;
        };
        info!("minitouch arch: {}, binary: {}", arch, binary.display());

        if !self.invoke_app.push(&binary).await || !self.invoke_app.chmod().await {
            return false;
        }

        let Some(mut channel) = self.invoke_app.invoke_bin("-i").await else {
            return false;
        };

        let timeout = Duration::from_secs_f64(TIMING_CONFIG.touch.calibration_timeout);
        let window = Duration::from_secs_f64(TIMING_CONFIG.touch.read_window);
        let calibration = match read_calibration(channel.as_mut(), timeout, window).await {
            Ok(calibration) => calibration,
            Err(e) => {
                error!("minitouch calibration failed: {}", e);
                channel.close().await;
                return false;
            }
        };
        info!(
            "minitouch contacts: {}, max: {}x{}, pressure: {}",
            calibration.contacts, calibration.max_x, calibration.max_y, calibration.max_pressure
        );

        self.session = Some(TouchSession {
            channel,
            width,
            height,
            xscale: f64::from(calibration.max_x) / f64::from(width),
            yscale: f64::from(calibration.max_y) / f64::from(height),
            pressure: calibration.max_pressure,
        });
        true
    }

    pub async fn deinit(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.channel.close().await;
            info!("minitouch session closed");
        }
    }

    pub async fn click(&mut self, x: i32, y: i32) -> bool {
        let Some(session) = self.session.as_mut() else {
            error!("minitouch is not initialized");
            return false;
        };

        let (x, y) = session.scale(x, y);
        let down = format!("d 0 {} {} {}\nc\n", x, y, session.pressure);
        session.write(&down).await && session.write("u 0\nc\n").await
    }

    pub async fn swipe(&mut self, steps: &[SwipeStep]) -> bool {
        let Some(session) = self.session.as_mut() else {
            error!("minitouch is not initialized");
            return false;
        };
        let Some((first, rest)) = steps.split_first().filter(|(_, rest)| !rest.is_empty()) else {
            error!("swipe needs at least 2 steps, got {}", steps.len());
            return false;
        };

        let (x, y) = session.scale(first.x, first.y);
        if !session
            .write(&format!("d 0 {} {} {}\nc\n", x, y, session.pressure))
            .await
        {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(first.delay)).await;

        for step in rest {
            let (x, y) = session.scale(step.x, step.y);
            if !session
                .write(&format!("m 0 {} {} {}\nc\n", x, y, session.pressure))
                .await
            {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(step.delay)).await;
        }

        session.write("u 0\nc\n").await
    }

    pub async fn press_key(&mut self, key: i32) -> bool {
        let Some(session) = self.session.as_mut() else {
            error!("minitouch is not initialized");
            return false;
        };

        session.write(&format!("k {} d\nc\n", key)).await
            && session.write(&format!("k {} u\nc\n", key)).await
    }
}

/// Read output until a complete `^` line arrives or the deadline passes.
///
/// Each read already blocks for up to `window`, so quiet windows loop straight back.
async fn read_calibration(
    channel: &mut dyn InteractiveChannel,
    timeout: Duration,
    window: Duration,
) -> Result<Calibration> {
    let deadline = Instant::now() + timeout;
    let mut buffer = String::new();

    loop {
        if let Some(start) = buffer.find('^') {
            if let Some(len) = buffer[start..].find('\n') {
                return parse_calibration(&buffer[start + 1..start + len]);
            }
        }

        if Instant::now() >= deadline {
            return Err(ControlError::Timeout(format!(
                "no calibration line within {:?}, received: {:?}",
                timeout, buffer
            )));
        }

        let window = window.min(deadline.saturating_duration_since(Instant::now()));
        let chunk = channel.read(window).await?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
}

fn parse_calibration(line: &str) -> Result<Calibration> {
    let values: Vec<i32> = line
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ControlError::Protocol(format!("bad calibration line {:?}: {}", line, e)))?;

    match values[..] {
        [contacts, max_x, max_y, max_pressure, ..] if max_x > 0 && max_y > 0 => Ok(Calibration {
            contacts,
            max_x,
            max_y,
            max_pressure,
        }),
        _ => Err(ControlError::Protocol(format!(
            "bad calibration line {:?}",
            line
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Reply, ScriptedTransport, SessionLog};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Stays quiet for `quiet` read windows, then prints `line`
    struct SlowStartChannel {
        quiet: usize,
        line: Option<String>,
        reads: usize,
    }

    #[async_trait]
    impl InteractiveChannel for SlowStartChannel {
        async fn write(&mut self, _data: &str) -> Result<()> {
            Ok(())
        }

        async fn read(&mut self, window: Duration) -> Result<Vec<u8>> {
            self.reads += 1;
            if self.quiet > 0 {
                self.quiet -= 1;
                tokio::time::sleep(window).await;
                return Ok(Vec::new());
            }
            match self.line.take() {
                Some(line) => Ok(line.into_bytes()),
                None => {
                    tokio::time::sleep(window).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn close(&mut self) {}
    }

    fn scripted(session_output: &[&str]) -> Arc<ScriptedTransport> {
        Arc::new(
            ScriptedTransport::new()
                .on("abilist", Reply::text("arm64-v8a,armeabi-v7a,armeabi"))
                .on("push", Reply::empty())
                .on("chmod", Reply::empty())
                .with_session_output(session_output),
        )
    }

    fn minitouch(transport: Arc<ScriptedTransport>) -> MinitouchInput {
        let mut base = UnitBase::new(transport);
        base.set_replacement(
            [("ADB", "adb"), ("ADB_SERIAL", "emulator-5554")]
                .into_iter()
                .collect(),
        );
        let config = ControlConfig::default_adb()
            .unwrap()
            .with_minitouch_root("/opt/agent/minitouch");
        MinitouchInput::parse(base, &config).unwrap()
    }

    async fn ready(session_output: &[&str]) -> (MinitouchInput, Arc<ScriptedTransport>, SessionLog) {
        let transport = scripted(session_output);
        let log = transport.session_log();
        let mut input = minitouch(transport.clone());
        assert!(input.init(1080, 1920).await);
        (input, transport, log)
    }

    #[test]
    fn test_parse_calibration() {
        assert_eq!(
            parse_calibration(" 10 1079 1919 2047").unwrap(),
            Calibration {
                contacts: 10,
                max_x: 1079,
                max_y: 1919,
                max_pressure: 2047
            }
        );
        assert!(parse_calibration(" 10 1079").is_err());
        assert!(parse_calibration(" a b c d").is_err());
    }

    #[tokio::test]
    async fn test_calibration_waits_one_window_per_quiet_read() {
        let mut channel = SlowStartChannel {
            quiet: 2,
            line: Some("^ 10 1079 1919 2047\n".to_string()),
            reads: 0,
        };
        let window = Duration::from_millis(200);

        let start = Instant::now();
        let calibration = read_calibration(&mut channel, Duration::from_secs(5), window)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(calibration.max_pressure, 2047);
        assert_eq!(channel.reads, 3);
        assert!(elapsed >= window * 2);
        assert!(elapsed < window * 3 + Duration::from_millis(100), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_calibration_times_out() {
        let mut channel = SlowStartChannel {
            quiet: usize::MAX,
            line: None,
            reads: 0,
        };
        let timeout = Duration::from_millis(300);

        let start = Instant::now();
        let result = read_calibration(&mut channel, timeout, Duration::from_millis(100)).await;

        assert!(matches!(result, Err(ControlError::Timeout(_))));
        assert!(start.elapsed() < timeout + Duration::from_millis(200));
        assert!(channel.reads <= 4);
    }

    #[tokio::test]
    async fn test_init_pushes_first_supported_abi() {
        let (input, transport, _) = ready(&["^ 10 1079 1919 2047\n"]).await;
        assert!(input.is_active());

        let push = transport
            .calls()
            .into_iter()
            .find(|call| call.contains(&"push".to_string()))
            .unwrap();
        assert!(push.contains(&"/opt/agent/minitouch/arm64-v8a/minitouch".to_string()));
    }

    #[tokio::test]
    async fn test_calibration_split_across_reads() {
        let (input, _, _) = ready(&["$ banner\n^ 10 10", "79 1919 20", "47\n> 1\n"]).await;
        let session = input.session.as_ref().unwrap();
        assert_eq!(session.pressure, 2047);
        assert!((session.xscale - 1079.0 / 1080.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unsupported_abi_fails() {
        let transport = Arc::new(ScriptedTransport::new().on("abilist", Reply::text("mips,mips64")));
        let mut input = minitouch(transport);
        assert!(!input.init(1080, 1920).await);
        assert!(!input.is_active());
    }

    #[tokio::test]
    async fn test_click_protocol() {
        let (mut input, _, log) = ready(&["^ 10 2160 3840 50\n"]).await;

        assert!(input.click(100, 200).await);
        assert_eq!(log.text(), "d 0 200 400 50\nc\nu 0\nc\n");
    }

    #[tokio::test]
    async fn test_click_clamps_out_of_range() {
        let (mut input, _, log) = ready(&["^ 10 1080 1920 50\n"]).await;

        assert!(input.click(5000, -3).await);
        assert_eq!(log.text(), "d 0 1079 0 50\nc\nu 0\nc\n");
    }

    #[tokio::test]
    async fn test_swipe_protocol() {
        let (mut input, _, log) = ready(&["^ 10 1080 1920 50\n"]).await;

        let steps = [
            SwipeStep::new(10, 20, 0),
            SwipeStep::new(30, 40, 0),
            SwipeStep::new(50, 60, 0),
        ];
        assert!(input.swipe(&steps).await);
        assert_eq!(
            log.text(),
            "d 0 10 20 50\nc\nm 0 30 40 50\nc\nm 0 50 60 50\nc\nu 0\nc\n"
        );
    }

    #[tokio::test]
    async fn test_single_step_swipe_rejected() {
        let (mut input, _, log) = ready(&["^ 10 1080 1920 50\n"]).await;

        assert!(!input.swipe(&[SwipeStep::new(10, 20, 0)]).await);
        assert!(log.text().is_empty());
    }

    #[tokio::test]
    async fn test_press_key_protocol() {
        let (mut input, _, log) = ready(&["^ 10 1080 1920 50\n"]).await;

        assert!(input.press_key(3).await);
        assert_eq!(log.text(), "k 3 d\nc\nk 3 u\nc\n");
    }

    #[tokio::test]
    async fn test_deinit_invalidates_session() {
        let (mut input, _, _) = ready(&["^ 10 1080 1920 50\n"]).await;

        input.deinit().await;
        assert!(!input.is_active());
        assert!(!input.click(1, 1).await);
    }
}
