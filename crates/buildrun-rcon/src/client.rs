//! RCON client and session.

use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::RconError;
use crate::protocol::{read_packet, write_packet, Packet, PacketKind, MAX_COMMAND_LEN};
use crate::sink::CommandSink;

/// Connection settings for one worker's control port.
#[derive(Clone)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    /// Per-worker control credential.
    pub password: String,
    pub connect_timeout: Duration,
    /// Bound on every reply (login and commands).
    pub command_timeout: Duration,
}

impl RconConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, t: Duration) -> Self {
        self.connect_timeout = t;
        self
    }

    pub fn with_command_timeout(mut self, t: Duration) -> Self {
        self.command_timeout = t;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for RconConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

/// Client for one worker's control port.
///
/// Holds no connection itself; every [`RconClient::connect`] opens a fresh
/// authenticated [`RconSession`] that closes when dropped.
#[derive(Debug, Clone)]
pub struct RconClient {
    config: RconConfig,
}

impl RconClient {
    pub fn new(config: RconConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RconConfig {
        &self.config
    }

    /// Open a TCP connection and authenticate.
    pub async fn connect(&self) -> Result<RconSession, RconError> {
        let addr = self.config.addr();
        debug!(addr = %addr, "Opening control session");

        let stream = match timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        {
            Err(_) => return Err(RconError::Timeout("connect")),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                return Err(RconError::ConnectionRefused(addr))
            }
            Ok(Err(e)) => return Err(RconError::Io(e)),
            Ok(Ok(stream)) => stream,
        };
        stream.set_nodelay(true)?;

        let mut session = RconSession {
            stream,
            next_id: 0,
            reply_timeout: self.config.command_timeout,
        };
        session.login(&self.config.password).await?;
        Ok(session)
    }
}

#[async_trait]
impl CommandSink for RconClient {
    async fn send_command(&self, command: &str) -> Result<String, RconError> {
        let mut session = self.connect().await?;
        session.command(command).await
    }

    async fn send_batch(
        &self,
        commands: &[String],
        spacing: Duration,
    ) -> Result<Vec<String>, RconError> {
        let mut session = self.connect().await?;
        let mut replies = Vec::with_capacity(commands.len());
        for (i, command) in commands.iter().enumerate() {
            if i > 0 && !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }
            replies.push(session.command(command).await?);
        }
        Ok(replies)
    }
}

/// An authenticated control session. Not shareable between tasks; callers
/// serialize their commands.
pub struct RconSession {
    stream: TcpStream,
    next_id: i32,
    reply_timeout: Duration,
}

impl RconSession {
    fn allocate_id(&mut self) -> i32 {
        // Ids stay positive; -1 is the server's auth-failure marker.
        self.next_id = if self.next_id == i32::MAX { 1 } else { self.next_id + 1 };
        self.next_id
    }

    async fn login(&mut self, password: &str) -> Result<(), RconError> {
        let id = self.allocate_id();
        write_packet(&mut self.stream, &Packet::new(id, PacketKind::Login, password)).await?;

        loop {
            let reply = self.read_reply("login reply").await?;
            if reply.request_id == -1 {
                return Err(RconError::AuthFailure);
            }
            // Some servers send an empty response packet ahead of the auth reply.
            if reply.is(PacketKind::Response) && reply.request_id == id {
                continue;
            }
            if reply.request_id != id {
                return Err(RconError::Protocol(format!(
                    "login reply id {} does not match request id {}",
                    reply.request_id, id
                )));
            }
            trace!("Control session authenticated");
            return Ok(());
        }
    }

    /// Send one command line and return the worker's textual reply.
    pub async fn command(&mut self, text: &str) -> Result<String, RconError> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.len() > MAX_COMMAND_LEN {
            return Err(RconError::CommandTooLong {
                len: text.len(),
                max: MAX_COMMAND_LEN,
            });
        }
        if text.contains('\n') {
            return Err(RconError::Protocol("command contains a line break".to_string()));
        }

        let id = self.allocate_id();
        write_packet(&mut self.stream, &Packet::new(id, PacketKind::Command, text)).await?;

        let reply = self.read_reply("command reply").await?;
        if reply.request_id == -1 {
            return Err(RconError::AuthFailure);
        }
        if reply.request_id != id || !reply.is(PacketKind::Response) {
            return Err(RconError::Protocol(format!(
                "unexpected reply (id {}, type {}) to request {}",
                reply.request_id, reply.kind, id
            )));
        }
        trace!(command = %text, reply = %reply.body, "Control command answered");
        Ok(reply.body)
    }

    async fn read_reply(&mut self, what: &'static str) -> Result<Packet, RconError> {
        match timeout(self.reply_timeout, read_packet(&mut self.stream)).await {
            Ok(result) => result,
            Err(_) => Err(RconError::Timeout(what)),
        }
    }
}
