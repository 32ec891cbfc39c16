//! App start and stop

use super::UnitBase;
use crate::argv::{ArgvTemplate, Replacement};
use crate::config::ControlConfig;
use crate::error::Result;

pub struct Activity {
    base: UnitBase,
    start_app_argv: ArgvTemplate,
    stop_app_argv: ArgvTemplate,
}

impl Activity {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Result<Self> {
        Ok(Self {
            start_app_argv: UnitBase::parse_argv(config, "StartApp")?,
            stop_app_argv: UnitBase::parse_argv(config, "StopApp")?,
            base,
        })
    }

    /// Launch `intent` (`package/activity`); any response counts as success
    pub async fn start(&self, intent: &str) -> bool {
        self.invoke(&self.start_app_argv, intent).await
    }

    /// Force-stop the package named by `intent`
    pub async fn stop(&self, intent: &str) -> bool {
        self.invoke(&self.stop_app_argv, intent).await
    }

    async fn invoke(&self, template: &ArgvTemplate, intent: &str) -> bool {
        let extra: Replacement = [("INTENT", intent)].into_iter().collect();
        let Some(argv) = self.base.gen(template, extra) else {
            return false;
        };
        self.base.run(argv).await.is_some()
    }
}
