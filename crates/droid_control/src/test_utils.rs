//! Test utilities for control units
//!
//! Provides a scripted in-memory `Transport` that answers commands by
//! substring match and records every argv it receives.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ControlError, Result};
use crate::transport::{InteractiveChannel, Transport};

/// What a scripted command does when matched
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return these bytes as output
    Output(Vec<u8>),
    /// Write these bytes to the path in the last argv token, return empty output
    WriteLastArg(Vec<u8>),
    /// Fail the command
    Fail,
}

impl Reply {
    pub fn text(s: &str) -> Self {
        Reply::Output(s.as_bytes().to_vec())
    }

    pub fn empty() -> Self {
        Reply::Output(Vec::new())
    }
}

struct Rule {
    pattern: String,
    delay: Duration,
    reply: Reply,
    hits: AtomicUsize,
}

/// Output and written-data log of a scripted interactive session
#[derive(Clone, Default)]
pub struct SessionLog {
    pub written: Arc<Mutex<String>>,
}

impl SessionLog {
    pub fn text(&self) -> String {
        self.written.lock().unwrap().clone()
    }
}

/// Scripted transport; the first rule whose pattern occurs in the joined argv wins
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Vec<String>>>,
    socket_port: Option<u16>,
    session_output: Mutex<VecDeque<Vec<u8>>>,
    stream_output: Mutex<VecDeque<Vec<u8>>>,
    session_log: SessionLog,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, reply: Reply) -> Self {
        self.on_delayed(pattern, Duration::ZERO, reply)
    }

    pub fn on_delayed(mut self, pattern: &str, delay: Duration, reply: Reply) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            delay,
            reply,
            hits: AtomicUsize::new(0),
        });
        self
    }

    pub fn with_socket_port(mut self, port: u16) -> Self {
        self.socket_port = Some(port);
        self
    }

    /// Queue output chunks returned by the next interactive session's reads
    pub fn with_session_output(self, chunks: &[&str]) -> Self {
        {
            let mut output = self.session_output.lock().unwrap();
            output.extend(chunks.iter().map(|c| c.as_bytes().to_vec()));
        }
        self
    }

    /// Queue byte chunks returned by reads on the next connected stream
    pub fn with_stream_output(self, chunks: Vec<Vec<u8>>) -> Self {
        self.stream_output.lock().unwrap().extend(chunks);
        self
    }

    pub fn session_log(&self) -> SessionLog {
        self.session_log.clone()
    }

    /// Number of commands matched by `pattern`
    pub fn hits(&self, pattern: &str) -> usize {
        self.rules
            .iter()
            .filter(|r| r.pattern == pattern)
            .map(|r| r.hits.load(Ordering::SeqCst))
            .sum()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn command(
        &self,
        argv: &[String],
        _recv_by_socket: bool,
        _timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(argv.to_vec());
        let joined = argv.join(" ");

        let rule = self
            .rules
            .iter()
            .find(|r| joined.contains(&r.pattern))
            .ok_or_else(|| ControlError::CommandFailed(format!("unscripted: {}", joined)))?;
        rule.hits.fetch_add(1, Ordering::SeqCst);

        if !rule.delay.is_zero() {
            tokio::time::sleep(rule.delay).await;
        }

        match &rule.reply {
            Reply::Output(bytes) => Ok(bytes.clone()),
            Reply::WriteLastArg(bytes) => {
                let path = argv
                    .last()
                    .ok_or_else(|| ControlError::CommandFailed("no destination".to_string()))?;
                std::fs::write(path, bytes)?;
                Ok(Vec::new())
            }
            Reply::Fail => Err(ControlError::CommandFailed(joined)),
        }
    }

    async fn open_socket(&self, _local_address: &str) -> Result<u16> {
        self.socket_port
            .ok_or_else(|| ControlError::Unavailable("socket disabled".to_string()))
    }

    async fn close_socket(&self) {}

    async fn interactive(&self, argv: &[String]) -> Result<Box<dyn InteractiveChannel>> {
        self.calls.lock().unwrap().push(argv.to_vec());
        let output = std::mem::take(&mut *self.session_output.lock().unwrap());
        Ok(Box::new(ScriptedChannel {
            output,
            log: self.session_log.clone(),
            closed: false,
        }))
    }

    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn InteractiveChannel>> {
        self.calls
            .lock()
            .unwrap()
            .push(vec!["connect".to_string(), format!("{}:{}", host, port)]);
        let output = std::mem::take(&mut *self.stream_output.lock().unwrap());
        if output.is_empty() {
            return Err(ControlError::Unavailable(format!("nothing listens on {}:{}", host, port)));
        }
        Ok(Box::new(ScriptedChannel {
            output,
            log: self.session_log.clone(),
            closed: false,
        }))
    }
}

struct ScriptedChannel {
    output: VecDeque<Vec<u8>>,
    log: SessionLog,
    closed: bool,
}

#[async_trait]
impl InteractiveChannel for ScriptedChannel {
    async fn write(&mut self, data: &str) -> Result<()> {
        if self.closed {
            return Err(ControlError::ChannelClosed);
        }
        self.log.written.lock().unwrap().push_str(data);
        Ok(())
    }

    /// Scripted chunks first, then quiet windows like an idle process
    async fn read(&mut self, window: Duration) -> Result<Vec<u8>> {
        match self.output.pop_front() {
            Some(chunk) => Ok(chunk),
            None => {
                tokio::time::sleep(window).await;
                Ok(Vec::new())
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// Encode an RGB image as PNG bytes
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buffer = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    buffer
}

/// Encode an RGB image as JPEG bytes
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
    let mut buffer = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
        .unwrap();
    buffer
}

/// Raw `screencap` output: 12-byte header (width, height, format) then RGBA pixels
pub fn raw_frame(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    for i in 0..(width * height) {
        data.extend_from_slice(&[(i % 200) as u8, 20, 30, 255]);
    }
    data
}

/// Gzip-compress `data`
pub fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Translate every `\n` into `\r\n`, as a lossy terminal transport would
pub fn crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    for &b in data {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}
