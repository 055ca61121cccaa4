//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (broker, quote API, sinks).
pub mod ports;

/// Application services for provisioning, publishing, reading and supervision.
pub mod services;
