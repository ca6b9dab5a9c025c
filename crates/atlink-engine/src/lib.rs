//! AT command/response engine.
//!
//! Turns the interleaved byte stream of a modem AT port into blocking
//! command/response calls plus asynchronous URC callbacks:
//!
//! - [`AtRegistry`] owns a fixed set of [`Instance`]s over one [`Transport`]
//! - [`Instance`] serializes commands, accumulates responses and strips URCs
//! - [`MockModem`] scripts a modem in memory; [`TcpTransport`] talks to a
//!   real AT port bridged over TCP
//! - [`global`] optionally makes one registry reachable process-wide
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use atlink_engine::{AtRegistry, EngineConfig, MockModem};
//!
//! let modem = MockModem::new();
//! modem.reply("AT+CSQ", "+CSQ: 15,99\r\n\r\nOK\r\n");
//!
//! let registry = AtRegistry::new(EngineConfig::default(), Arc::new(modem.clone()));
//! let at = registry.instance(0).unwrap();
//! at.add_urc_handler("+CREG:", |line| println!("registration: {}", line)).unwrap();
//!
//! assert!(at.send_command_expect_ok(Duration::from_millis(500), "AT+CSQ"));
//! ```

mod config;
mod error;
pub mod global;
mod guard;
mod instance;
mod macros;
mod mock;
mod policy;
mod registry;
mod slots;
mod stats;
mod stream;
mod transport;

pub use config::{EngineConfig, OverflowPolicy, DEFAULT_TIMEOUT_MS};
pub use error::{AtError, AtResult, ConfigError, TransportError};
pub use instance::Instance;
pub use mock::MockModem;
pub use policy::LogPolicy;
pub use registry::AtRegistry;
pub use slots::ResponseRing;
pub use stats::InstanceStats;
pub use stream::TcpTransport;
pub use transport::{ChannelHandle, RxNotify, Transport};

pub use atlink_protocol::{noop_urc, ProtocolError};
