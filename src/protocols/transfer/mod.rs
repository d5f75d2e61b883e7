//! File transfer protocol.
//!
//! One connection carries one transfer at a time. All integers are
//! little-endian and fixed width.
//!
//! ## Protocol Format
//!
//! ```text
//! Upload:
//!   C->S  'U' | name_len:u8 | name | size:u64
//!   S->C  status:u8 (0 = OK, 1 = ERROR [| err_len:u8 | err])
//!   C->S  size bytes of file data
//!   S->C  status:u8 (0 = OK)
//!
//! Download:
//!   C->S  'D' | name_len:u8 | name
//!   S->C  status:u8 (0 = OK, 1 = ERROR [| err_len:u8 | err])
//!   S->C  size:u64 | size bytes of file data
//! ```
//!
//! An unknown action byte closes the connection without a reply. Any other
//! rejection sends one ERROR confirmation and then closes the connection.

pub mod codec;
pub mod machine;
pub mod service;

pub use codec::{CodecError, Direction};
pub use machine::{Phase, Request, Step, Transfer, TransferMachine};
pub use service::FileTransferService;

use crate::storage::StoreError;
use std::io;
use thiserror::Error;

/// Why a transfer ended early.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed bytes from the client.
    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),
    /// Well-formed request the server refused; the client was told why.
    #[error("request rejected: {0}")]
    Rejected(&'static str),
    /// Writing to the socket failed.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
    /// Opening, reading or writing the file failed.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] StoreError),
}
