//! Command table and prebuilt-binary configuration for ADB control units

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{ControlError, Result};

/// ABI priority list used when the config does not provide one
pub const DEFAULT_MINITOUCH_ARCHS: &[&str] = &["x86_64", "x86", "arm64-v8a", "armeabi-v7a", "armeabi"];

/// ABIs with a usable minicap build; the x86_64 library is 32-bit and arm64 stalls
pub const DEFAULT_MINICAP_ARCHS: &[&str] = &["x86", "armeabi-v7a", "armeabi"];

/// Android SDK levels with a prebuilt `minicap.so`, newest first
pub const DEFAULT_MINICAP_SDKS: &[i32] = &[31, 29, 28, 27, 26, 25, 24, 23, 22, 21, 19, 18, 17, 16, 15, 14];

/// Built-in command table for a stock `adb` executable
pub const DEFAULT_ADB_CONFIG: &str = r#"{
    "prebuilt": {
        "minitouch": {
            "root": "./agent/minitouch",
            "arch": ["x86_64", "x86", "arm64-v8a", "armeabi-v7a", "armeabi"]
        },
        "minicap": {
            "root": "./agent/minicap",
            "arch": ["x86", "armeabi-v7a", "armeabi"],
            "sdk": [31, 29, 28, 27, 26, 25, 24, 23, 22, 21, 19, 18, 17, 16, 15, 14]
        }
    },
    "command": {
        "Devices": ["{ADB}", "devices"],
        "Connect": ["{ADB}", "connect", "{ADB_SERIAL}"],
        "KillServer": ["{ADB}", "kill-server"],
        "UUID": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "settings get secure android_id"],
        "Resolution": [
            "{ADB}", "-s", "{ADB_SERIAL}", "shell",
            "dumpsys window displays | grep -o -E cur=+[^\\ ]+ | grep -o -E [0-9]+"
        ],
        "Orientation": [
            "{ADB}", "-s", "{ADB_SERIAL}", "shell",
            "dumpsys input | grep SurfaceOrientation | grep -m 1 -o -E [0-9]"
        ],
        "StartApp": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "am start -n {INTENT}"],
        "StopApp": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "am force-stop {INTENT}"],
        "Click": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "input tap {X} {Y}"],
        "Swipe": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "input swipe {X1} {Y1} {X2} {Y2} {DURATION}"],
        "PressKey": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "input keyevent {KEY}"],
        "ForwardSocket": ["{ADB}", "-s", "{ADB_SERIAL}", "forward", "tcp:{FOWARD_PORT}", "localabstract:{LOCAL_SOCKET}"],
        "NetcatAddress": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "cat /proc/net/arp | grep : "],
        "ScreencapRawByNetcat": [
            "{ADB}", "-s", "{ADB_SERIAL}", "exec-out",
            "screencap | nc -w 3 {NETCAT_ADDRESS} {NETCAT_PORT}"
        ],
        "ScreencapRawWithGzip": ["{ADB}", "-s", "{ADB_SERIAL}", "exec-out", "screencap | gzip -1"],
        "ScreencapEncode": ["{ADB}", "-s", "{ADB_SERIAL}", "exec-out", "screencap -p"],
        "ScreencapEncodeToFile": [
            "{ADB}", "-s", "{ADB_SERIAL}", "shell",
            "screencap -p > \"/data/local/tmp/{TEMP_FILE}\""
        ],
        "PullFile": ["{ADB}", "-s", "{ADB_SERIAL}", "pull", "/data/local/tmp/{TEMP_FILE}", "{DST_PATH}"],
        "Abilist": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "getprop ro.product.cpu.abilist | tr -d '\n\r'"],
        "SDK": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "getprop ro.build.version.sdk | tr -d '\n\r'"],
        "PushBin": ["{ADB}", "-s", "{ADB_SERIAL}", "push", "{BIN_PATH}", "/data/local/tmp/{BIN_WORKING_FILE}"],
        "ChmodBin": ["{ADB}", "-s", "{ADB_SERIAL}", "shell", "chmod 700 \"/data/local/tmp/{BIN_WORKING_FILE}\""],
        "InvokeBin": [
            "{ADB}", "-s", "{ADB_SERIAL}", "shell",
            "export LD_LIBRARY_PATH=/data/local/tmp/; \"/data/local/tmp/{BIN_WORKING_FILE}\" {BIN_EXTRA_PARAMS} 2>&1"
        ],
        "InvokeApp": [
            "{ADB}", "-s", "{ADB_SERIAL}", "shell",
            "export CLASSPATH=\"/data/local/tmp/{APP_WORKING_FILE}\"; app_process /data/local/tmp {PACKAGE_NAME}"
        ]
    }
}"#;

/// Location and ABI list of the prebuilt minitouch binaries
#[derive(Debug, Clone, Deserialize)]
pub struct MinitouchPrebuilt {
    /// Directory holding `{arch}/minitouch`
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Supported ABIs in priority order
    #[serde(default = "default_minitouch_archs")]
    pub arch: Vec<String>,
}

fn default_minitouch_archs() -> Vec<String> {
    DEFAULT_MINITOUCH_ARCHS.iter().map(|s| s.to_string()).collect()
}

impl Default for MinitouchPrebuilt {
    fn default() -> Self {
        Self {
            root: None,
            arch: default_minitouch_archs(),
        }
    }
}

impl MinitouchPrebuilt {
    /// Path of the binary for `arch`, if a root directory is configured
    pub fn binary_for(&self, arch: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(arch).join("minitouch"))
    }
}

/// Location, ABI list and SDK compatibility table of the prebuilt minicap builds
#[derive(Debug, Clone, Deserialize)]
pub struct MinicapPrebuilt {
    /// Directory holding `{arch}/bin/minicap` and `{arch}/lib/android-{sdk}/minicap.so`
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_minicap_archs")]
    pub arch: Vec<String>,
    /// SDK levels with a library build, newest first
    #[serde(default = "default_minicap_sdks")]
    pub sdk: Vec<i32>,
}

fn default_minicap_archs() -> Vec<String> {
    DEFAULT_MINICAP_ARCHS.iter().map(|s| s.to_string()).collect()
}

fn default_minicap_sdks() -> Vec<i32> {
    DEFAULT_MINICAP_SDKS.to_vec()
}

impl Default for MinicapPrebuilt {
    fn default() -> Self {
        Self {
            root: None,
            arch: default_minicap_archs(),
            sdk: default_minicap_sdks(),
        }
    }
}

impl MinicapPrebuilt {
    pub fn binary_for(&self, arch: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(arch).join("bin").join("minicap"))
    }

    pub fn library_for(&self, arch: &str, sdk: i32) -> Option<PathBuf> {
        self.root.as_ref().map(|root| {
            root.join(arch)
                .join("lib")
                .join(format!("android-{}", sdk))
                .join("minicap.so")
        })
    }

    /// Newest library SDK level not above the device's
    pub fn fit_sdk(&self, device_sdk: i32) -> Option<i32> {
        self.sdk.iter().copied().find(|&sdk| sdk <= device_sdk)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrebuiltConfig {
    #[serde(default)]
    pub minitouch: MinitouchPrebuilt,
    /// Minicap strategies are disabled when absent
    #[serde(default)]
    pub minicap: Option<MinicapPrebuilt>,
}

/// Parsed controller configuration: command templates plus prebuilt binaries
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub prebuilt: PrebuiltConfig,
    pub command: Map<String, Value>,
}

impl ControlConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// The built-in ADB configuration
    pub fn default_adb() -> Result<Self> {
        Self::from_json_str(DEFAULT_ADB_CONFIG)
    }

    /// Raw template value for a command name
    pub fn command(&self, name: &str) -> Result<&Value> {
        self.command
            .get(name)
            .ok_or_else(|| ControlError::MissingCommand(name.to_string()))
    }

    /// Override the minitouch prebuilt root directory
    pub fn with_minitouch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.prebuilt.minitouch.root = Some(root.into());
        self
    }

    /// Override the minicap prebuilt root directory, enabling minicap capture
    pub fn with_minicap_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.prebuilt
            .minicap
            .get_or_insert_with(MinicapPrebuilt::default)
            .root = Some(root.into());
        self
    }
}
