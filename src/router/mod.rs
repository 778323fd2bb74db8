//! Request routing: the provider cascade and its aggregate statistics.

mod service;
mod stats;

pub use service::{AiService, RespondOptions, RouterReply};
pub use stats::{StatsRegistry, StatsSnapshot};
