//! Device transport abstraction
//!
//! This module provides:
//! - `Transport`: one-shot command execution, the netcat capture socket,
//!   interactive sessions and forwarded TCP streams
//! - `InteractiveChannel`: a long-lived child process driven line by line
//! - `process`: the real implementation on top of `tokio::process`
//!
//! Nothing outside this module touches the device transport directly.

mod process;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub use process::{ProcessChannel, ProcessTransport, TcpChannel};

/// Executes generated argument vectors against the device transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `argv` to completion and return its captured output.
    ///
    /// With `recv_by_socket` the payload received on the socket opened by
    /// [`Transport::open_socket`] is returned instead of the pipe output.
    async fn command(&self, argv: &[String], recv_by_socket: bool, timeout: Duration)
        -> Result<Vec<u8>>;

    /// Open the host-side listener used for socket capture, returning its port
    async fn open_socket(&self, local_address: &str) -> Result<u16>;

    async fn close_socket(&self);

    /// Spawn `argv` as a long-lived interactive process
    async fn interactive(&self, argv: &[String]) -> Result<Box<dyn InteractiveChannel>>;

    /// Connect to a TCP endpoint, usually a port forwarded to a device socket
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn InteractiveChannel>>;
}

/// Bidirectional byte channel to a running process or socket
#[async_trait]
pub trait InteractiveChannel: Send {
    /// Write raw protocol text; fails once the process is gone
    async fn write(&mut self, data: &str) -> Result<()>;

    /// Wait up to `window` for output and return what arrived (possibly empty)
    async fn read(&mut self, window: Duration) -> Result<Vec<u8>>;

    async fn close(&mut self);
}
