//! Domain Layer - Core pipeline types.
//!
//! Topic definitions, market data records and their decoding, and task
//! lifecycle states. Nothing in this layer performs I/O.

/// Task lifecycle states.
pub mod lifecycle;

/// Market data records, events and payload decoding.
pub mod market_data;

/// Topic definitions and provisioning outcomes.
pub mod topic;
