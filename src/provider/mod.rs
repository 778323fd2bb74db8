//! Provider clients and their wire transports.
//!
//! Each configured upstream gets one [`ProviderClient`] wrapping the
//! transport for its wire protocol, plus private health, quota and
//! conversation state.

mod browser;
mod client;
mod gemini;
mod history;
mod openai;
pub mod transport;

pub use client::{ModelStatus, ProviderClient, ProviderFailure, ProviderReply};
pub use transport::{ChatMessage, ChatTransport, Role, TransportError, TransportReply};
