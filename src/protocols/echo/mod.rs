//! Echo protocol implementation.
//!
//! A demo service with no framing: every chunk the server reads is written
//! straight back, prefixed with `Echoing `.
//!
//! ```text
//! Request:  hello
//! Response: Echoing hello
//! ```
//!
//! Since reads are not framed, a client message may come back split over
//! several prefixed replies.

pub mod handler;

pub use handler::EchoService;
