//! Kafka Broker Adapter
//!
//! `BrokerConnector` implementation backed by librdkafka through `rdkafka`.
//!
//! # Components
//!
//! - `KafkaBrokerClient`: Stateless factory holding the bootstrap list and client id
//! - `KafkaTopicAdmin`: Topic creation
//! - `KafkaMessageProducer`: Acknowledged, unkeyed publishing
//! - `KafkaMessageConsumer`: Consumer-group reads with manual offset commits
//!
//! No handle creates an rdkafka client until it is connected.

mod admin;
mod client;
mod consumer;
mod producer;

pub use admin::KafkaTopicAdmin;
pub use client::KafkaBrokerClient;
pub use consumer::KafkaMessageConsumer;
pub use producer::KafkaMessageProducer;

use crate::application::ports::BrokerError;

/// Parse a comma-separated `host:port` bootstrap list.
///
/// Blank entries are ignored. The result is never empty.
///
/// # Errors
///
/// Returns `BrokerError::InvalidBootstrap` if the list has no entries, or if
/// an entry has no host, no port, or a port that is not in `1..=65535`.
pub fn parse_bootstrap_servers(list: &str) -> Result<Vec<String>, BrokerError> {
    let servers = list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(validate_server)
        .collect::<Result<Vec<_>, _>>()?;

    if servers.is_empty() {
        return Err(BrokerError::InvalidBootstrap(
            "bootstrap server list is empty".to_string(),
        ));
    }
    Ok(servers)
}

fn validate_server(entry: &str) -> Result<String, BrokerError> {
    let invalid = |reason: &str| BrokerError::InvalidBootstrap(format!("'{entry}': {reason}"));

    let (host, port) = entry.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid("port must be a number between 1 and 65535")),
        Ok(_) => Ok(entry.to_string()),
    }
}
