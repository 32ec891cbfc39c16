//! Touch and key input through one-shot `input` shell commands

use tracing::error;

use super::{SwipeStep, UnitBase};
use crate::argv::{ArgvTemplate, Replacement};
use crate::config::ControlConfig;
use crate::error::Result;

/// Input backend issuing one command per gesture.
///
/// A successful gesture produces no output at all; anything printed is
/// treated as an error message.
pub struct TapInput {
    base: UnitBase,
    click_argv: ArgvTemplate,
    swipe_argv: ArgvTemplate,
    press_key_argv: ArgvTemplate,
}

impl TapInput {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Result<Self> {
        Ok(Self {
            click_argv: UnitBase::parse_argv(config, "Click")?,
            swipe_argv: UnitBase::parse_argv(config, "Swipe")?,
            press_key_argv: UnitBase::parse_argv(config, "PressKey")?,
            base,
        })
    }

    pub async fn click(&self, x: i32, y: i32) -> bool {
        let extra: Replacement = [("X", x.to_string()), ("Y", y.to_string())]
            .into_iter()
            .collect();
        self.silent(&self.click_argv, extra).await
    }

    /// Swipe from the first step to the second.
    ///
    /// `input swipe` takes a single segment, so steps past the second are
    /// ignored and the duration is the first step's delay.
    pub async fn swipe(&self, steps: &[SwipeStep]) -> bool {
        let [first, second, ..] = steps else {
            error!("swipe needs at least 2 steps, got {}", steps.len());
            return false;
        };

        let extra: Replacement = [
            ("X1", first.x.to_string()),
            ("Y1", first.y.to_string()),
            ("X2", second.x.to_string()),
            ("Y2", second.y.to_string()),
            ("DURATION", first.delay.to_string()),
        ]
        .into_iter()
        .collect();
        self.silent(&self.swipe_argv, extra).await
    }

    pub async fn press_key(&self, key: i32) -> bool {
        let extra: Replacement = [("KEY", key.to_string())].into_iter().collect();
        self.silent(&self.press_key_argv, extra).await
    }

    async fn silent(&self, template: &ArgvTemplate, extra: Replacement) -> bool {
        let Some(argv) = self.base.gen(template, extra) else {
            return false;
        };
        match self.base.run(argv).await {
            Some(output) if output.is_empty() => true,
            Some(output) => {
                error!("unexpected input output: {}", String::from_utf8_lossy(&output).trim());
                false
            }
            None => false,
        }
    }
}
