//! Remote control client for BuildRun worker instances
//!
//! This crate speaks the RCON administrative protocol: one authenticated TCP
//! session per worker, one text command per request, one text reply per
//! command.
//!
//! # Example
//!
//! ```rust,no_run
//! use buildrun_rcon::{CommandSink, RconClient, RconConfig};
//!
//! async fn say_hello() -> Result<(), buildrun_rcon::RconError> {
//!     let client = RconClient::new(RconConfig::new("127.0.0.1", 25576, "secret"));
//!
//!     // Scoped: connects, authenticates, runs one command, disconnects.
//!     let reply = client.send_command("list").await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod protocol;
mod sink;

pub use client::{RconClient, RconConfig, RconSession};
pub use error::RconError;
pub use protocol::{Packet, PacketKind, MAX_COMMAND_LEN};
pub use sink::CommandSink;
