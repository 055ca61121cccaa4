//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Fan-out and channel sinks for decoded market data.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Kafka broker adapters (admin, producer, consumer group).
pub mod kafka;

/// In-process broker for local runs and tests.
pub mod memory;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Upstream quote API adapters.
pub mod quote_api;

/// OpenTelemetry tracing integration.
pub mod telemetry;
