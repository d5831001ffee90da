//! MQTT link: report publishing, availability, and the trigger subscription.
//!
//! One client connection is shared by all MQTT sinks. Its event loop runs on a
//! dedicated thread that keeps the connection alive, re-subscribes to the trigger
//! topic after every (re)connect, and forwards trigger tokens to the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};

use super::tls::{MqttEndpoint, TlsMaterials};
use crate::dispatch::ResultSink;
use crate::pipeline::sleep_unless_stopped;
use crate::report::InspectionReport;
use crate::trigger::{matches_token, TriggerSender};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct MqttTopics {
    pub status: String,
    pub details: String,
    pub verdict: String,
    pub trigger: String,
    pub availability: String,
}

impl Default for MqttTopics {
    fn default() -> Self {
        Self {
            status: "defect_detection/status".to_string(),
            details: "defect_detection/details".to_string(),
            verdict: "factory/detect_result".to_string(),
            trigger: "factory/detect_trigger".to_string(),
            availability: "defect_detection/availability".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topics: MqttTopics,
    pub trigger_token: String,
}

pub struct MqttLink {
    client: Client,
    topics: MqttTopics,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MqttLink {
    /// Create the client and start its event loop. The broker does not have to be
    /// reachable yet; the loop keeps retrying.
    pub fn connect(settings: &MqttSettings, trigger: Option<TriggerSender>) -> Result<Self> {
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.endpoint.host.clone(),
            settings.endpoint.port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user.clone(), settings.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            settings.topics.availability.clone(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        options.set_transport(settings.endpoint.build_transport(&settings.tls)?);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let event_loop = EventLoop {
            client: client.clone(),
            topics: settings.topics.clone(),
            trigger: trigger.map(|sender| (sender, settings.trigger_token.clone())),
            stop: Arc::clone(&stop),
        };
        let handle = std::thread::Builder::new()
            .name("mqtt-eventloop".to_string())
            .spawn(move || event_loop.run(connection))
            .context("spawn mqtt event loop")?;

        log::info!(
            "MQTT link to {} (client id {}, auth: {})",
            settings.endpoint,
            settings.client_id,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            topics: settings.topics.clone(),
            stop,
            handle: Some(handle),
        })
    }

    /// One sink per report topic.
    pub fn sinks(&self) -> Vec<Arc<dyn ResultSink>> {
        [
            (MqttPayload::Status, &self.topics.status),
            (MqttPayload::Details, &self.topics.details),
            (MqttPayload::Verdict, &self.topics.verdict),
        ]
        .into_iter()
        .map(|(payload, topic)| {
            Arc::new(MqttTopicSink {
                client: self.client.clone(),
                topic: topic.clone(),
                payload,
            }) as Arc<dyn ResultSink>
        })
        .collect()
    }

    /// Mark the service offline and close the connection.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.client.try_publish(
            self.topics.availability.clone(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect: {}", err);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct EventLoop {
    client: Client,
    topics: MqttTopics,
    trigger: Option<(TriggerSender, String)>,
    stop: Arc<AtomicBool>,
}

impl EventLoop {
    fn run(self, mut connection: Connection) {
        for event in connection.iter() {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let Some((sender, token)) = &self.trigger else {
                        continue;
                    };
                    let topic = match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => topic,
                        Err(e) => {
                            log::warn!("skipping publish with invalid topic: {}", e);
                            continue;
                        }
                    };
                    if topic != self.topics.trigger {
                        continue;
                    }
                    if matches_token(&publish.payload, token) {
                        log::info!("trigger token received on {}", topic);
                        sender.fire();
                    } else {
                        log::debug!("ignoring payload on {}", topic);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!(
                        "MQTT connection error: {}. Reconnecting in {:?}",
                        e,
                        RECONNECT_DELAY
                    );
                    sleep_unless_stopped(RECONNECT_DELAY, &self.stop);
                }
            }
        }
        log::info!("MQTT event loop stopped");
    }

    /// Publish availability and restore the trigger subscription. Uses the
    /// non-blocking client calls since this thread also drains the request queue.
    fn on_connected(&self) {
        log::info!("MQTT connected");
        if let Err(e) = self.client.try_publish(
            self.topics.availability.clone(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_ONLINE.as_bytes().to_vec(),
        ) {
            log::warn!("failed to publish availability: {}", e);
        }
        if self.trigger.is_some() {
            match self
                .client
                .try_subscribe(self.topics.trigger.clone(), QoS::AtLeastOnce)
            {
                Ok(()) => log::info!("subscribed to {}", self.topics.trigger),
                Err(e) => log::warn!("failed to subscribe to {}: {}", self.topics.trigger, e),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MqttPayload {
    /// Bare status word: `Normal`, `Substandard` or `Defective`.
    Status,
    /// Full JSON report.
    Details,
    /// `{status, timestamp, defectCount}` JSON.
    Verdict,
}

impl MqttPayload {
    pub fn render(&self, report: &InspectionReport) -> Result<Vec<u8>> {
        Ok(match self {
            MqttPayload::Status => report.status.as_str().as_bytes().to_vec(),
            MqttPayload::Details => serde_json::to_vec(report).context("serialize report")?,
            MqttPayload::Verdict => {
                serde_json::to_vec(&report.verdict()).context("serialize verdict")?
            }
        })
    }

    fn sink_name(&self) -> &'static str {
        match self {
            MqttPayload::Status => "mqtt-status",
            MqttPayload::Details => "mqtt-details",
            MqttPayload::Verdict => "mqtt-verdict",
        }
    }
}

pub struct MqttTopicSink {
    client: Client,
    topic: String,
    payload: MqttPayload,
}

impl ResultSink for MqttTopicSink {
    fn name(&self) -> &str {
        self.payload.sink_name()
    }

    fn deliver(&self, report: &InspectionReport) -> Result<()> {
        let payload = self.payload.render(report)?;
        self.client
            .publish(self.topic.clone(), QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("publish to {}", self.topic))?;
        Ok(())
    }
}
