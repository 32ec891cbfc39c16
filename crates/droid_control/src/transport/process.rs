//! Subprocess-backed transport for `adb`-like executables

use async_trait::async_trait;
use std::net::SocketAddr;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{InteractiveChannel, Transport};
use crate::config::TIMING_CONFIG;
use crate::error::{ControlError, Result};

const READ_CHUNK: usize = 4096;

/// Runs commands as host subprocesses
pub struct ProcessTransport {
    listener: Mutex<Option<TcpListener>>,
    accept_timeout: Duration,
}

impl ProcessTransport {
    pub fn new() -> Self {
        Self {
            listener: Mutex::new(None),
            accept_timeout: Duration::from_secs_f64(TIMING_CONFIG.screencap.socket_accept_timeout),
        }
    }

    /// Set how long a socket command waits for the device to connect back
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    fn spawn(argv: &[String], interactive: bool) -> Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ControlError::CommandFailed("empty argv".to_string()))?;

        Command::new(program)
            .args(args)
            .stdin(if interactive { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(if interactive { Stdio::null() } else { Stdio::piped() })
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ControlError::Unavailable(format!("executable not found: {}", program))
                } else {
                    ControlError::Io(e)
                }
            })
    }

    async fn recv_socket(&self, timeout: Duration) -> Result<Vec<u8>> {
        let guard = self.listener.lock().await;
        let listener = guard
            .as_ref()
            .ok_or_else(|| ControlError::Unavailable("socket is not open".to_string()))?;

        let (mut stream, peer) = tokio::time::timeout(self.accept_timeout, listener.accept())
            .await
            .map_err(|_| {
                ControlError::Timeout(format!("accept timeout after {:?}", self.accept_timeout))
            })??;
        debug!("socket peer connected: {}", peer);

        let mut data = Vec::new();
        tokio::time::timeout(timeout, stream.read_to_end(&mut data))
            .await
            .map_err(|_| ControlError::Timeout(format!("socket read timeout after {:?}", timeout)))??;

        Ok(data)
    }
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn check_exit(argv: &[String], output: Output) -> Result<Vec<u8>> {
    let Output {
        status,
        stdout,
        stderr,
    } = output;

    if !status.success() {
        return Err(ControlError::CommandFailed(format!(
            "`{}` exited with {}: {}",
            argv.join(" "),
            status,
            String::from_utf8_lossy(&stderr).trim()
        )));
    }
    if !stderr.is_empty() {
        debug!("stderr: {}", String::from_utf8_lossy(&stderr).trim());
    }

    Ok(stdout)
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn command(
        &self,
        argv: &[String],
        recv_by_socket: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let child = Self::spawn(argv, false)?;

        if !recv_by_socket {
            let output = tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| ControlError::Timeout(format!("`{}` after {:?}", argv.join(" "), timeout)))??;
            return check_exit(argv, output);
        }

        let payload = match self.recv_socket(timeout).await {
            Ok(payload) => payload,
            Err(e) => {
                // dropping the child kills it
                error!("socket receive failed: {}", e);
                return Err(e);
            }
        };

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ControlError::Timeout(format!("`{}` after {:?}", argv.join(" "), timeout)))??;
        check_exit(argv, output)?;

        Ok(payload)
    }

    async fn open_socket(&self, local_address: &str) -> Result<u16> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
        let port = listener.local_addr()?.port();
        info!("capture socket listening, local_address: {}, port: {}", local_address, port);

        *self.listener.lock().await = Some(listener);
        Ok(port)
    }

    async fn close_socket(&self) {
        if self.listener.lock().await.take().is_some() {
            debug!("capture socket closed");
        }
    }

    async fn interactive(&self, argv: &[String]) -> Result<Box<dyn InteractiveChannel>> {
        let mut child = Self::spawn(argv, true)?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ControlError::Unavailable("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ControlError::Unavailable("stdout was not captured".to_string()))?;

        info!("interactive process started, pid: {:?}", pid);
        Ok(Box::new(ProcessChannel {
            child,
            stdin: Some(stdin),
            stdout,
        }))
    }

    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn InteractiveChannel>> {
        let stream = tokio::time::timeout(self.accept_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ControlError::Timeout(format!("connect to {}:{}", host, port)))??;
        stream.set_nodelay(true)?;

        info!("stream connected: {}:{}", host, port);
        Ok(Box::new(TcpChannel {
            stream: Some(stream),
        }))
    }
}

/// Interactive channel over a child's stdin/stdout
pub struct ProcessChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

#[async_trait]
impl InteractiveChannel for ProcessChannel {
    async fn write(&mut self, data: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(ControlError::ChannelClosed)?;

        if let Err(e) = stdin.write_all(data.as_bytes()).await {
            warn!("write to interactive process failed: {}", e);
            self.stdin = None;
            return Err(ControlError::ChannelClosed);
        }
        stdin.flush().await.map_err(|_| ControlError::ChannelClosed)
    }

    async fn read(&mut self, window: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; READ_CHUNK];

        match tokio::time::timeout(window, self.stdout.read(&mut buf)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(ControlError::ChannelClosed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(ControlError::Io(e)),
        }
    }

    async fn close(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.start_kill() {
            debug!("interactive process already gone: {}", e);
        }
        let _ = self.child.wait().await;
    }
}

/// Channel over a TCP connection
pub struct TcpChannel {
    stream: Option<TcpStream>,
}

#[async_trait]
impl InteractiveChannel for TcpChannel {
    async fn write(&mut self, data: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(ControlError::ChannelClosed)?;
        stream
            .write_all(data.as_bytes())
            .await
            .map_err(|_| ControlError::ChannelClosed)
    }

    async fn read(&mut self, window: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(ControlError::ChannelClosed)?;
        let mut buf = vec![0u8; READ_CHUNK];

        match tokio::time::timeout(window, stream.read(&mut buf)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(ControlError::ChannelClosed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(ControlError::Io(e)),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
