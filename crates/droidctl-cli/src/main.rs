//! droidctl - drive an Android device from the command line
//!
//! Usage:
//!     droidctl [OPTIONS]
//!
//! Environment Variables:
//!     DROIDCTL_ADB: adb executable (default: adb)
//!     DROIDCTL_SERIAL: device serial or host:port (default: 127.0.0.1:5555)
//!     DROIDCTL_CONFIG: command template JSON file (default: built-in adb table)
//!     DROIDCTL_LOG: tracing filter (default: droid_control=info)

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use droid_control::{
    ActionStatus, ControlConfig, ControlUnits, Controller, ControllerEvent, ControllerOptions,
    FrameSaver, ProcessTransport, TargetSize, TouchKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// droidctl - Android device control over adb
#[derive(Parser, Debug)]
#[command(name = "droidctl")]
#[command(about = "Android device control over adb")]
#[command(after_help = r#"Examples:
    # List attached devices
    droidctl --list-devices

    # Capture the screen of an emulator
    droidctl --serial emulator-5554 --screencap screen.png

    # Tap, then swipe up over 300 ms using minitouch
    droidctl --touch minitouch --minitouch-root ./agent/minitouch \
        --click 540,1200 --swipe 540,1600,540,400,300

    # Capture through minicap when it is the fastest method
    droidctl --minicap-root ./agent/minicap --screencap screen.png

    # Start an activity
    droidctl --start-app com.android.settings/.Settings
"#)]
struct Cli {
    /// adb executable
    #[arg(long, env = "DROIDCTL_ADB", default_value = "adb")]
    adb: String,

    /// Device serial or host:port
    #[arg(short = 's', long, env = "DROIDCTL_SERIAL", default_value = "127.0.0.1:5555")]
    serial: String,

    /// Command template JSON file
    #[arg(long, env = "DROIDCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Touch backend: tap or minitouch
    #[arg(long, default_value = "tap")]
    touch: TouchKind,

    /// Directory holding `<abi>/minitouch` binaries
    #[arg(long)]
    minitouch_root: Option<PathBuf>,

    /// Directory holding the minicap builds; enables minicap capture
    #[arg(long)]
    minicap_root: Option<PathBuf>,

    /// Scale frames to this height; touch coordinates are then in that space
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    target_height: Option<u32>,

    /// List attached devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Kill the adb server and exit
    #[arg(long)]
    kill_server: bool,

    /// Write one captured frame to this PNG file
    #[arg(long, value_name = "FILE")]
    screencap: Option<PathBuf>,

    /// Save the captured frame into a timestamped session directory
    #[arg(long, value_name = "DIR")]
    save_dir: Option<PathBuf>,

    /// Start an activity (package/.Activity)
    #[arg(long, value_name = "INTENT")]
    start_app: Option<String>,

    /// Tap at X,Y
    #[arg(long, value_name = "X,Y", value_parser = parse_point)]
    click: Option<(i32, i32)>,

    /// Swipe from X1,Y1 to X2,Y2 over MS milliseconds
    #[arg(long, value_name = "X1,Y1,X2,Y2,MS", value_parser = parse_swipe)]
    swipe: Option<[i32; 5]>,

    /// Press an Android key code
    #[arg(long, value_name = "KEYCODE")]
    key: Option<i32>,

    /// Force-stop a package
    #[arg(long, value_name = "PACKAGE")]
    stop_app: Option<String>,
}

fn parse_ints(s: &str) -> Result<Vec<i32>> {
    s.split(',')
        .map(|v| {
            v.trim()
                .parse::<i32>()
                .with_context(|| format!("invalid number: {}", v))
        })
        .collect()
}

fn parse_point(s: &str) -> Result<(i32, i32)> {
    match parse_ints(s)?[..] {
        [x, y] => Ok((x, y)),
        _ => Err(anyhow!("expected X,Y, got {}", s)),
    }
}

fn parse_swipe(s: &str) -> Result<[i32; 5]> {
    let values = parse_ints(s)?;
    let swipe: [i32; 5] = values
        .try_into()
        .map_err(|_| anyhow!("expected X1,Y1,X2,Y2,MS, got {}", s))?;
    if swipe[4] < 0 {
        bail!("swipe duration must not be negative");
    }
    Ok(swipe)
}

/// Fail early with a readable message when adb is missing
fn check_adb(adb: &str) -> Result<()> {
    which::which(adb).map(|_| ()).map_err(|_| {
        anyhow!(
            "{} is not installed or not in PATH.\n\
             Install Android platform tools:\n  \
             - macOS: brew install android-platform-tools\n  \
             - Linux: sudo apt install android-tools-adb",
            adb
        )
    })
}

fn load_config(args: &Cli) -> Result<ControlConfig> {
    let config = match &args.config {
        Some(path) => ControlConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ControlConfig::default_adb()?,
    };
    let config = match &args.minitouch_root {
        Some(root) => config.with_minitouch_root(root),
        None => config,
    };
    Ok(match &args.minicap_root {
        Some(root) => config.with_minicap_root(root),
        None => config,
    })
}

fn print_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::UuidGot { uuid } => println!("device uuid: {}", uuid),
        ControllerEvent::ResolutionGot { width, height } => {
            println!("resolution: {}x{}", width, height)
        }
        ControllerEvent::ConnectSuccess => println!("connected"),
        ControllerEvent::ConnectFailed { why } => println!("connect failed: {}", why),
        ControllerEvent::ActionFailed { id, .. } => println!("action #{} failed", id),
        other => info!("event: {:?}", other),
    }
}

async fn expect_success(controller: &Controller, id: i64, what: &str) -> Result<()> {
    match controller.wait(id).await {
        ActionStatus::Success => Ok(()),
        status => bail!("{} did not succeed: {:?}", what, status),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DROIDCTL_LOG")
                .unwrap_or_else(|_| EnvFilter::new("droid_control=info")),
        )
        .init();

    let args = Cli::parse();
    check_adb(&args.adb)?;

    let config = load_config(&args)?;
    let transport = Arc::new(ProcessTransport::new());
    let units = ControlUnits::from_config(&config, &args.adb, &args.serial, args.touch, transport)?;

    if args.list_devices {
        let devices = units
            .connection
            .devices()
            .await
            .ok_or_else(|| anyhow!("failed to list devices"))?;
        if devices.is_empty() {
            println!("No devices connected.");
        }
        for device in devices {
            println!("{}", device);
        }
        return Ok(());
    }

    if args.kill_server {
        if !units.connection.kill_server().await {
            bail!("failed to kill adb server");
        }
        println!("adb server killed");
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let mut options = ControllerOptions::default().with_events(tx);
    if let Some(height) = args.target_height {
        options = options.with_target_size(TargetSize::Height(height))?;
    }
    let controller = Controller::new(units, options);

    expect_success(&controller, controller.post_connection(), "connect").await?;

    if let Some(intent) = &args.start_app {
        expect_success(&controller, controller.post_start_app(intent.as_str()), "start app").await?;
    }
    if let Some((x, y)) = args.click {
        expect_success(&controller, controller.post_click(x, y), "click").await?;
    }
    if let Some([x1, y1, x2, y2, ms]) = args.swipe {
        let id = controller.post_swipe(&[x1, x2], &[y1, y2], &[ms as u64, 0]);
        expect_success(&controller, id, "swipe").await?;
    }
    if let Some(key) = args.key {
        expect_success(&controller, controller.post_press_key(key), "press key").await?;
    }
    if let Some(package) = &args.stop_app {
        expect_success(&controller, controller.post_stop_app(package.as_str()), "stop app").await?;
    }

    if args.screencap.is_some() || args.save_dir.is_some() {
        expect_success(&controller, controller.post_screencap(), "screencap").await?;
        let frame = controller
            .get_image_cache()
            .ok_or_else(|| anyhow!("no frame captured"))?;
        println!("frame: {}x{}", frame.width(), frame.height());

        if let Some(path) = &args.screencap {
            tokio::fs::write(path, frame.encode_png()?).await?;
            println!("saved {}", path.display());
        }
        if let Some(dir) = &args.save_dir {
            let mut saver = FrameSaver::new(dir).await?;
            let path = saver.save(&frame).await?;
            println!("saved {}", path.display());
        }
    }

    controller.release();
    drop(controller);
    let _ = printer.await;
    Ok(())
}
