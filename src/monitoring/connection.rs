//! Connection manager for the Pi-hole telnet API
//!
//! Opens one line-oriented session to the appliance with a bounded number of
//! fixed-delay attempts:
//! - Host resolution and TCP connect are both part of an attempt
//! - Every attempt is bounded by its own timeout
//! - After the last failed attempt the caller gets [`ConnectionExhausted`]

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, instrument};

use crate::utils::error::{ConnectError, ConnectionExhausted};

/// Default number of connect attempts
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between attempts
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default per-attempt timeout
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(100);

/// An open text channel to the appliance
///
/// Owned by exactly one polling loop. After [`Session::close`] the session
/// must not be used again.
#[async_trait]
pub trait Session: Send {
    /// Address the session is bound to
    fn peer(&self) -> String;

    /// Write one request line
    async fn send(&mut self, request: &str) -> io::Result<()>;

    /// Read lines until one equals `terminator`, returning the raw bytes
    /// including the terminator line
    ///
    /// EOF before the terminator is an error.
    async fn read_until_marker(&mut self, terminator: &str) -> io::Result<Vec<u8>>;

    /// Shut the channel down
    async fn close(&mut self) -> io::Result<()>;
}

/// Boxed session handed out by the connection manager
pub type BoxedSession = Box<dyn Session>;

/// One dial step: resolve the host and open the transport
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedSession, ConnectError>;
}

/// TCP session over a buffered stream
pub struct TcpSession {
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
}

impl TcpSession {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
        }
    }
}

#[async_trait]
impl Session for TcpSession {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    async fn send(&mut self, request: &str) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await
    }

    async fn read_until_marker(&mut self, terminator: &str) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();

        loop {
            let line_start = buf.len();
            let read = self.stream.read_until(b'\n', &mut buf).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before end-of-message marker",
                ));
            }

            let line = &buf[line_start..];
            if line.trim_ascii_end() == terminator.as_bytes() {
                return Ok(buf);
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.get_mut().shutdown().await
    }
}

/// Production connector: DNS lookup followed by a TCP connect
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedSession, ConnectError> {
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ConnectError::Resolution {
                host: host.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| ConnectError::Resolution {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
            })?;

        info!(host = %host, ip = %addr.ip(), "Resolved Pi-hole host");

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ConnectError::Transport { addr, source })?;

        Ok(Box::new(TcpSession::new(stream, addr)))
    }
}

/// Fixed-delay retry policy for establishing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per connect call, at least 1
    pub max_attempts: u32,
    /// Sleep between two attempts
    pub retry_delay: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Establishes sessions with bounded retry
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Open a session, retrying with a fixed delay
    ///
    /// Resolution failures, connect failures and attempt timeouts all count as
    /// failed attempts. There is no delay after the final attempt.
    #[instrument(skip(self), fields(max_attempts = self.policy.max_attempts))]
    pub async fn connect(&self, host: &str, port: u16) -> Result<BoxedSession, ConnectionExhausted> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(attempt, host = %host, port, "Attempting to connect to Pi-hole");

            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.connector.dial(host, port),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Timeout(self.policy.attempt_timeout)),
            };

            match result {
                Ok(session) => {
                    info!(attempt, peer = %session.peer(), "Successfully connected to Pi-hole");
                    return Ok(session);
                }
                Err(e) => {
                    error!(attempt, error = %e, "An error occurred while connecting");

                    if attempt >= max_attempts {
                        return Err(ConnectionExhausted {
                            host: host.to_string(),
                            port,
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                }
            }

            info!(
                delay_secs = self.policy.retry_delay.as_secs_f64(),
                "Retrying connection"
            );
            tokio::time::sleep(self.policy.retry_delay).await;
            debug!(next_attempt = attempt + 1, "Retry delay elapsed");
        }
    }
}
