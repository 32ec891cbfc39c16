//! Pushing and running helper binaries on the device

use std::path::Path;
use tracing::{error, info};

use super::UnitBase;
use crate::argv::{ArgvTemplate, Replacement};
use crate::config::ControlConfig;
use crate::error::Result;
use crate::transport::InteractiveChannel;

/// Deploys a helper binary (or library, or dex) under `/data/local/tmp` and runs it.
///
/// The `SDK` and `InvokeApp` templates are optional; operations needing them
/// fail with a logged error when they are absent.
pub struct InvokeApp {
    base: UnitBase,
    abilist_argv: ArgvTemplate,
    sdk_argv: Option<ArgvTemplate>,
    push_bin_argv: ArgvTemplate,
    chmod_bin_argv: ArgvTemplate,
    invoke_bin_argv: ArgvTemplate,
    invoke_app_argv: Option<ArgvTemplate>,
    working_file: Option<String>,
}

impl InvokeApp {
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Result<Self> {
        Ok(Self {
            abilist_argv: UnitBase::parse_argv(config, "Abilist")?,
            sdk_argv: UnitBase::parse_optional_argv(config, "SDK")?,
            push_bin_argv: UnitBase::parse_argv(config, "PushBin")?,
            chmod_bin_argv: UnitBase::parse_argv(config, "ChmodBin")?,
            invoke_bin_argv: UnitBase::parse_argv(config, "InvokeBin")?,
            invoke_app_argv: UnitBase::parse_optional_argv(config, "InvokeApp")?,
            working_file: None,
            base,
        })
    }

    /// Pick a fresh working file name under the device temp directory
    pub fn init(&mut self) -> bool {
        self.init_with_name(&format!("droidctl_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Use a fixed working file name, for files other binaries look up by name
    pub fn init_with_name(&mut self, name: &str) -> bool {
        if name.is_empty() || name.contains('/') {
            error!("invalid working file name: {:?}", name);
            return false;
        }
        info!("working file: {}", name);
        self.base.merge_replacement(
            [("BIN_WORKING_FILE", name), ("APP_WORKING_FILE", name)]
                .into_iter()
                .collect(),
            true,
        );
        self.working_file = Some(name.to_string());
        true
    }

    pub fn has_sdk(&self) -> bool {
        self.sdk_argv.is_some()
    }

    pub fn working_file(&self) -> Option<&str> {
        self.working_file.as_deref()
    }

    /// ABIs supported by the device, in the device's preference order
    pub async fn abilist(&self) -> Option<Vec<String>> {
        let argv = self.base.gen(&self.abilist_argv, Replacement::new())?;
        let output = self.base.run(argv).await?;

        let text = String::from_utf8_lossy(&output);
        let abis: Vec<String> = text
            .trim_end_matches(['\r', '\n'])
            .split(',')
            .map(str::trim)
            .filter(|abi| !abi.is_empty())
            .map(str::to_string)
            .collect();

        info!("abilist: {:?}", abis);
        Some(abis)
    }

    /// Android API level of the device
    pub async fn sdk(&self) -> Option<i32> {
        let Some(template) = &self.sdk_argv else {
            error!("SDK command is not configured");
            return None;
        };
        let argv = self.base.gen(template, Replacement::new())?;
        let output = self.base.run(argv).await?;

        let text = String::from_utf8_lossy(&output);
        match text.trim().parse::<i32>() {
            Ok(sdk) => {
                info!("sdk: {}", sdk);
                Some(sdk)
            }
            Err(e) => {
                error!("bad sdk output {:?}: {}", text, e);
                None
            }
        }
    }

    /// Push a host binary to the working file
    pub async fn push(&self, path: &Path) -> bool {
        if !self.ready() {
            return false;
        }
        let extra: Replacement = [("BIN_PATH", path.to_string_lossy().into_owned())]
            .into_iter()
            .collect();
        let Some(argv) = self.base.gen(&self.push_bin_argv, extra) else {
            return false;
        };
        self.base.run(argv).await.is_some()
    }

    pub async fn chmod(&self) -> bool {
        if !self.ready() {
            return false;
        }
        let Some(argv) = self.base.gen(&self.chmod_bin_argv, Replacement::new()) else {
            return false;
        };
        self.base.run(argv).await.is_some()
    }

    /// Start the pushed binary with `extra` arguments as an interactive session
    pub async fn invoke_bin(&self, extra: &str) -> Option<Box<dyn InteractiveChannel>> {
        if !self.ready() {
            return None;
        }
        let params: Replacement = [("BIN_EXTRA_PARAMS", extra)].into_iter().collect();
        let argv = self.base.gen(&self.invoke_bin_argv, params)?;
        info!("invoke: {}", argv.join(" "));

        match self.base.transport().interactive(&argv).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                error!("failed to start interactive binary: {}", e);
                None
            }
        }
    }

    /// Run the pushed binary to completion and return its output
    pub async fn invoke_bin_stdout(&self, extra: &str) -> Option<Vec<u8>> {
        if !self.ready() {
            return None;
        }
        let params: Replacement = [("BIN_EXTRA_PARAMS", extra)].into_iter().collect();
        let argv = self.base.gen(&self.invoke_bin_argv, params)?;
        self.base.run(argv).await
    }

    /// Start `package` from the pushed dex through `app_process`
    pub async fn invoke_app(&self, package: &str) -> Option<Box<dyn InteractiveChannel>> {
        if !self.ready() {
            return None;
        }
        let Some(template) = &self.invoke_app_argv else {
            error!("InvokeApp command is not configured");
            return None;
        };
        let params: Replacement = [("PACKAGE_NAME", package)].into_iter().collect();
        let argv = self.base.gen(template, params)?;
        info!("invoke app: {}", argv.join(" "));

        match self.base.transport().interactive(&argv).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                error!("failed to start app process: {}", e);
                None
            }
        }
    }

    fn ready(&self) -> bool {
        if self.working_file.is_none() {
            error!("invoke app used before init");
            return false;
        }
        true
    }
}
