//! Streaming translation engine for the codex bridge.
//!
//! Turns heterogeneous upstream event notifications into a monotonic
//! sequence of OpenAI chat-completion chunks: canonicalise the event
//! type, extract the delta text, coalesce snapshots and duplicates into
//! increments, and drive each stream to exactly one `[DONE]`.

pub mod coalesce;
pub mod engine;
pub mod event;
pub mod registry;
pub mod stream;

pub use engine::{BridgeEngine, EngineConfig};
pub use stream::CompleteStream;
