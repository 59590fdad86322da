//! Wire protocol of the bidirectional synthesis backend.
//!
//! - [`frame`]: stateless binary frame codec
//! - [`messages`]: outbound control payload builders
//! - [`fields`]: tolerant extraction rules for inbound control payloads

pub mod fields;
pub mod frame;
pub mod messages;

pub use frame::{decode, encode, EventKind, Frame, Payload};
