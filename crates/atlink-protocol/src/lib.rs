//! AT Command Line Protocol
//!
//! This crate provides the stateless pieces of the AT command/response engine:
//! scanning an accumulated receive buffer for line-anchored headers and
//! response terminators, and pulling unsolicited result codes (URCs) out of
//! that buffer before a command response is assembled from it.
//!
//! # Protocol Overview
//!
//! The AT protocol is a line-based text interface without length prefixes:
//!
//! - **Commands** (host → modem): ASCII text terminated with `\r`
//! - **Responses** (modem → host): zero or more intermediate lines followed by
//!   a final result such as `OK` or `ERROR`, separated by `\r\n` or `\r`
//! - **URCs** (modem → host): single lines such as `+CREG: 1` that may arrive
//!   at any time, including in the middle of a response
//!
//! Completion is inferred solely from [`TERMINATORS`] and the end of the line
//! carrying one; see [`response_len`].
//!
//! # Example
//!
//! ```rust
//! use atlink_protocol::{is_response_complete, noop_urc, UrcTable};
//!
//! let mut table = UrcTable::new(20, 31);
//! table.register("#RING", noop_urc).unwrap();
//!
//! let mut buffer = b"#RING\r\n+CSQ: 15,99\r\n\r\nOK\r\n".to_vec();
//! assert_eq!(table.dispatch(&mut buffer), 1);
//! assert!(is_response_complete(&buffer));
//! ```

mod error;
mod scanner;
mod urc;

pub use error::*;
pub use scanner::*;
pub use urc::*;
