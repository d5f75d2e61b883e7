//! Protocol implementations.
//!
//! Each protocol is a [`Handler`](crate::runtime::Handler) driven by the
//! multiplexer.
//!
//! - `transfer`: framed upload/download of named files
//! - `echo`: unframed echo demo

pub mod echo;
pub mod transfer;

pub use echo::EchoService;
pub use transfer::FileTransferService;
