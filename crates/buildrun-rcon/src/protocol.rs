//! RCON wire format.
//!
//! Every packet is:
//!
//! ```text
//! i32 LE  length   (bytes that follow)
//! i32 LE  request id
//! i32 LE  type
//! [u8]    body (ASCII/UTF-8, no NUL)
//! u8 0, u8 0
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RconError;

/// Longest command body the worker accepts in one request.
pub const MAX_COMMAND_LEN: usize = 1446;

/// Longest reply body the worker sends in one packet.
const MAX_REPLY_BODY: usize = 4096;

/// id + type + two terminators.
const HEADER_AND_TERMINATORS: usize = 10;

/// Packet type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Client login request.
    Login,
    /// Client command request. Shares its code with the login reply.
    Command,
    /// Server reply to a command.
    Response,
}

impl PacketKind {
    fn code(self) -> i32 {
        match self {
            Self::Login => 3,
            Self::Command => 2,
            Self::Response => 0,
        }
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    /// Raw type code; see [`PacketKind`].
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(request_id: i32, kind: PacketKind, body: impl Into<String>) -> Self {
        Self {
            request_id,
            kind: kind.code(),
            body: body.into(),
        }
    }

    pub fn is(&self, kind: PacketKind) -> bool {
        self.kind == kind.code()
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let length = (body.len() + HEADER_AND_TERMINATORS) as i32;
        let mut buf = Vec::with_capacity(body.len() + HEADER_AND_TERMINATORS + 4);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }
}

/// Write one packet and flush.
pub(crate) async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one packet, validating framing.
pub(crate) async fn read_packet<R>(reader: &mut R) -> Result<Packet, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let length = i32::from_le_bytes(len_buf);
    if length < HEADER_AND_TERMINATORS as i32
        || length as usize > MAX_REPLY_BODY + HEADER_AND_TERMINATORS
    {
        return Err(RconError::Protocol(format!("invalid packet length {}", length)));
    }

    let mut buf = vec![0u8; length as usize];
    reader.read_exact(&mut buf).await?;

    let request_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let (body, terminators) = buf[8..].split_at(buf.len() - HEADER_AND_TERMINATORS);
    if terminators != [0, 0] {
        return Err(RconError::Protocol("missing packet terminator".to_string()));
    }

    Ok(Packet {
        request_id,
        kind,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}
