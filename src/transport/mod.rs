//! Result sinks and the MQTT link.
//!
//! - MQTT: status, details and verdict topics plus the trigger subscription
//! - HTTP: JSON POST of every report
//! - Snapshots: annotated JPEGs referenced by `imageUrl`

mod http;
pub mod mqtt;
mod snapshot;
mod tls;

pub use http::HttpSink;
pub use mqtt::{MqttLink, MqttPayload, MqttSettings, MqttTopicSink, MqttTopics};
pub use snapshot::{Snapshot, SnapshotConfig, SnapshotStore};
pub use tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};
