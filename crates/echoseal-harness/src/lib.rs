//! Deterministic test harness for the echoseal exchange server.
//!
//! Implementations of the [`echoseal_core::Environment`] and
//! [`echoseal_core::MessageControl`] seams for reproducible tests:
//!
//! - [`SimEnv`]: seeded RNG and Tokio virtual time
//! - [`ScriptedControl`]: facade whose receive/respond outcomes are scripted
//!   per call, including failures and waits that never complete; records
//!   every call for assertions
//! - [`LoopbackControl`]: reference facade speaking a small CBOR envelope
//!   over the byte channels, with [`LoopbackClient`] as the peer side
//! - [`SimEchoServer`]: the orchestrator served over turmoil TCP

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loopback;
pub mod message;
pub mod scripted;
pub mod sim_env;
pub mod sim_server;
pub mod wire;

pub use loopback::{LoopbackClient, LoopbackControl};
pub use message::SimMessage;
pub use scripted::{
    RecordedReceive, RecordedResponse, ReceiveScript, RespondScript, ScriptedControl,
};
pub use sim_env::SimEnv;
pub use sim_server::SimEchoServer;
