//! filecourier: a TCP file transfer server
//!
//! A single-threaded mio event loop multiplexes client connections. Each
//! connection speaks a small framed protocol to upload a named file into a
//! data directory or download one out of it.
//!
//! - [`runtime`]: event loop, connection registry and handler interface
//! - [`protocols`]: the transfer protocol and an echo demo
//! - [`storage`]: filename resolution under the data root
//! - [`client`]: async client for the transfer protocol

pub mod client;
pub mod config;
pub mod protocols;
pub mod runtime;
pub mod storage;
