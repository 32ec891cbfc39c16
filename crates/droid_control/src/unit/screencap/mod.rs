//! Screen capture with automatic strategy selection
//!
//! Several capture strategies are configured side by side. `init` times one
//! capture through each and keeps the fastest that produced a frame; every
//! later capture goes through that strategy only.

mod decode;
mod methods;
mod minicap;

use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::UnitBase;
use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::frame::CapturedFrame;

pub use decode::{
    clean_cr, decode_jpeg, decode_jpeg_in_output, decode_png, EndOfLine, Encoding, FrameDecoder,
};
pub use methods::{CaptureStrategy, Encode, EncodeToFileAndPull, RawByNetcat, RawWithGzip};
pub use minicap::{MinicapDirect, MinicapStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreencapMethod {
    UnknownYet,
    RawByNetcat,
    RawWithGzip,
    Encode,
    EncodeToFileAndPull,
    MinicapDirect,
    MinicapStream,
}

impl fmt::Display for ScreencapMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScreencapMethod::UnknownYet => "UnknownYet",
            ScreencapMethod::RawByNetcat => "RawByNetcat",
            ScreencapMethod::RawWithGzip => "RawWithGzip",
            ScreencapMethod::Encode => "Encode",
            ScreencapMethod::EncodeToFileAndPull => "EncodeToFileAndPull",
            ScreencapMethod::MinicapDirect => "MinicapDirect",
            ScreencapMethod::MinicapStream => "MinicapStream",
        };
        f.write_str(name)
    }
}

/// Strategy dispatcher
pub struct Screencap {
    strategies: Vec<Box<dyn CaptureStrategy>>,
    method: ScreencapMethod,
}

impl Screencap {
    /// Build every strategy whose templates are configured
    pub fn parse(base: UnitBase, config: &ControlConfig) -> Result<Self> {
        let mut strategies: Vec<Box<dyn CaptureStrategy>> = Vec::new();

        if let Some(s) = RawByNetcat::parse(base.clone(), config) {
            strategies.push(Box::new(s));
        }
        if let Some(s) = RawWithGzip::parse(base.clone(), config) {
            strategies.push(Box::new(s));
        }
        if let Some(s) = Encode::parse(base.clone(), config) {
            strategies.push(Box::new(s));
        }
        if let Some(s) = EncodeToFileAndPull::parse(base.clone(), config) {
            strategies.push(Box::new(s));
        }
        if let Some(s) = MinicapDirect::parse(base.clone(), config) {
            strategies.push(Box::new(s));
        }
        if let Some(s) = MinicapStream::parse(base, config) {
            strategies.push(Box::new(s));
        }

        Self::from_strategies(strategies)
    }

    pub fn from_strategies(strategies: Vec<Box<dyn CaptureStrategy>>) -> Result<Self> {
        if strategies.is_empty() {
            return Err(ControlError::MissingCommand(
                "no screencap method configured".to_string(),
            ));
        }
        Ok(Self {
            strategies,
            method: ScreencapMethod::UnknownYet,
        })
    }

    /// Currently selected method, `UnknownYet` before a successful init
    pub fn method(&self) -> ScreencapMethod {
        self.method
    }

    /// Methods available from the configuration, in evaluation order
    pub fn available(&self) -> Vec<ScreencapMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Initialise every strategy, then pick the fastest working one
    pub async fn init(&mut self, width: i32, height: i32) -> bool {
        let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
            error!("invalid screen size {}x{}", width, height);
            return false;
        };

        for strategy in &mut self.strategies {
            if !strategy.init(width, height).await {
                info!("screencap method {} failed to init", strategy.method());
            }
        }

        self.speed_test().await
    }

    pub async fn deinit(&mut self) {
        for strategy in &mut self.strategies {
            strategy.deinit().await;
        }
        self.method = ScreencapMethod::UnknownYet;
    }

    /// Capture one frame through the selected method
    pub async fn screencap(&mut self) -> Option<CapturedFrame> {
        if self.method == ScreencapMethod::UnknownYet {
            error!("unknown screencap method");
            return None;
        }

        let method = self.method;
        let strategy = self.strategies.iter_mut().find(|s| s.method() == method)?;
        strategy.screencap().await.map(CapturedFrame::new)
    }

    async fn speed_test(&mut self) -> bool {
        self.method = ScreencapMethod::UnknownYet;
        let mut best: Option<(ScreencapMethod, Duration)> = None;

        for strategy in &mut self.strategies {
            let start = Instant::now();
            if strategy.screencap().await.is_none() {
                info!("screencap method {} failed", strategy.method());
                continue;
            }
            let cost = start.elapsed();
            info!("screencap method {} took {:?}", strategy.method(), cost);

            if best.map_or(true, |(_, fastest)| cost < fastest) {
                best = Some((strategy.method(), cost));
            }
        }

        match best {
            Some((method, cost)) => {
                info!("fastest screencap method is {}, {:?}", method, cost);
                self.method = method;
                true
            }
            None => {
                error!("cannot find any method to screencap");
                false
            }
        }
    }
}
