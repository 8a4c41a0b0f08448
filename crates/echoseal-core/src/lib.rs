//! Echoseal core seams.
//!
//! The secure-messaging engine that authenticates entities, exchanges keys
//! and encrypts messages lives behind the [`MessageControl`] facade. This
//! crate defines what flows across that boundary:
//!
//! - [`EntityContext`]: who this server is and which preshared entity keys
//!   it knows
//! - [`MessageContext`]: how to interpret an inbound message
//!   ([`ReceiveMessageContext`]) or build an outbound one
//!   ([`RespondMessageContext`])
//! - [`InboundMessage`]: the result of a receive, a payload stream plus
//!   sender identity, user and error header
//! - [`ControlError`]: the facade's own failure channel
//!
//! Nothing here performs I/O on its own. Time and randomness come from
//! [`Environment`] so the same code runs under simulation and in production.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod context;
pub mod control;
pub mod env;
pub mod error;
pub mod message;

pub use context::{
    EntityContext, MessageContext, PresharedKeyStore, ReceiveMessageContext,
    RespondMessageContext,
};
pub use control::{Channel, MessageControl};
pub use env::Environment;
pub use error::ControlError;
pub use message::{
    DEFAULT_CHARSET, ErrorHeader, InboundMessage, ResponseCode, ServiceToken, User,
};
