//! Child-process JSON-RPC runtime for the codex bridge.
//!
//! The child speaks MCP (a JSON-RPC 2.0 dialect) over line-delimited
//! stdio. This crate owns the framing codec, the pending-request table,
//! the stdout read loop, and the supervised process lifecycle. What the
//! notifications mean is the business of the crate sitting on top.

pub mod core;
pub mod error;
pub mod supervisor;
