//! MQTT client adapter.
//!
//! Implements [`TransportPort`] over `esp_idf_svc::mqtt::client::EspMqttClient`.
//! The client callback runs in the ESP-MQTT task and is a pure producer:
//!
//! ```text
//!   BeforeConnect / Connected / Disconnected / Error ──▶ NET_EVENTS
//!   Received { topic, data }                         ──▶ INBOUND
//!   Received, but INBOUND full or payload too big    ──▶ NET_EVENTS (InboundDropped)
//! ```
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-MQTT client.
//! - **all other targets**: an in-memory recorder for host-side tests.

use log::{debug, warn};

use crate::app::commands::{InboundKind, InboundMessage};
use crate::app::ports::{QoS, TransportError, TransportPort};
use crate::channels::{INBOUND, NET_EVENTS};
use crate::connectivity::NetEvent;

#[cfg(target_os = "espidf")]
use log::{error, info};

/// Broker credentials and the client identity.
#[derive(Debug, Clone, Copy)]
pub struct MqttSettings<'s> {
    pub broker_uri: &'s str,
    pub client_id: &'s str,
    pub login: &'s str,
    pub password: &'s str,
}

// ───────────────────────────────────────────────────────────────
// Callback → task bridge
// ───────────────────────────────────────────────────────────────

/// Classify one received message.  Unknown topics yield `Ok(None)`.
pub fn inbound_message(topic: &str, data: &[u8]) -> Result<Option<InboundMessage>, NetEvent> {
    let Ok(kind) = InboundKind::from_topic(topic) else {
        debug!("MQTT: message on unhandled topic {}", topic);
        return Ok(None);
    };
    InboundMessage::new(kind, data).map(Some).ok_or(NetEvent::InboundDropped {
        topic_len: topic.len(),
        payload_len: data.len(),
    })
}

fn post_event(event: NetEvent) {
    if NET_EVENTS.try_send(event).is_err() {
        warn!("MQTT: event queue full, {:?} dropped", event);
    }
}

/// Hand a received message to the orchestrator, or report the drop.
pub fn route_inbound(topic: &str, data: &[u8]) {
    match inbound_message(topic, data) {
        Ok(Some(msg)) => {
            if INBOUND.try_send(msg).is_err() {
                post_event(NetEvent::InboundDropped {
                    topic_len: topic.len(),
                    payload_len: data.len(),
                });
            }
        }
        Ok(None) => {}
        Err(dropped) => post_event(dropped),
    }
}

// ───────────────────────────────────────────────────────────────
// Device transport
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod client {
    use core::time::Duration;

    use esp_idf_svc::mqtt::client::{
        Details, EspMqttClient, EventPayload, MqttClientConfiguration, QoS as EspQoS,
    };

    use super::{MqttSettings, post_event, route_inbound};
    use crate::app::ports::{QoS, TransportError};
    use crate::connectivity::NetEvent;

    const KEEP_ALIVE: Duration = Duration::from_secs(30);

    pub fn esp_qos(qos: QoS) -> EspQoS {
        match qos {
            QoS::AtMostOnce => EspQoS::AtMostOnce,
            QoS::AtLeastOnce => EspQoS::AtLeastOnce,
            QoS::ExactlyOnce => EspQoS::ExactlyOnce,
        }
    }

    pub fn start(settings: &MqttSettings<'_>) -> Result<EspMqttClient<'static>, TransportError> {
        let conf = MqttClientConfiguration {
            client_id: Some(settings.client_id),
            username: Some(settings.login),
            password: Some(settings.password),
            keep_alive_interval: Some(KEEP_ALIVE),
            ..Default::default()
        };
        EspMqttClient::new_cb(settings.broker_uri, &conf, |event| match event.payload() {
            EventPayload::BeforeConnect => post_event(NetEvent::Connecting),
            EventPayload::Connected(_) => post_event(NetEvent::Connected),
            EventPayload::Disconnected => post_event(NetEvent::Disconnected),
            EventPayload::Error(e) => {
                log::error!("MQTT: client error {:?}", e);
                post_event(NetEvent::Error);
            }
            EventPayload::Received { topic, data, details, .. } => {
                let topic = topic.unwrap_or("");
                if matches!(details, Details::Complete) {
                    route_inbound(topic, data);
                } else {
                    // Chunked deliveries exceed the inbound size limit anyway.
                    post_event(NetEvent::InboundDropped {
                        topic_len: topic.len(),
                        payload_len: data.len(),
                    });
                }
            }
            _ => {}
        })
        .map_err(|e| TransportError::Rejected(e.code()))
    }
}

#[cfg(target_os = "espidf")]
pub struct MqttTransport {
    client: esp_idf_svc::mqtt::client::EspMqttClient<'static>,
}

#[cfg(target_os = "espidf")]
impl MqttTransport {
    /// Start the client; it connects and reconnects on its own.
    pub fn start(settings: &MqttSettings<'_>) -> Result<Self, TransportError> {
        info!("MQTT: starting client for {}", settings.broker_uri);
        let client = client::start(settings).inspect_err(|e| error!("MQTT: client start failed: {}", e))?;
        Ok(Self { client })
    }
}

#[cfg(target_os = "espidf")]
impl TransportPort for MqttTransport {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        self.client
            .enqueue(topic, client::esp_qos(qos), retain, payload)
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.code()))
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, client::esp_qos(qos))
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.code()))
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

/// One message handed to the simulated client.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct MqttTransport {
    published: Vec<SimPublish>,
    subscriptions: Vec<String>,
    fail_publish: bool,
}

#[cfg(not(target_os = "espidf"))]
impl MqttTransport {
    pub fn start(settings: &MqttSettings<'_>) -> Result<Self, TransportError> {
        if settings.broker_uri.is_empty() {
            return Err(TransportError::NotConnected);
        }
        log::info!("MQTT(sim): client started for {}", settings.broker_uri);
        Ok(Self::default())
    }

    pub fn published(&self) -> &[SimPublish] {
        &self.published
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Make every later publish fail, as if the outbox were full.
    pub fn sim_fail_publish(&mut self, fail: bool) {
        self.fail_publish = fail;
    }
}

#[cfg(not(target_os = "espidf"))]
impl TransportPort for MqttTransport {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        if self.fail_publish {
            return Err(TransportError::Rejected(-1));
        }
        self.published.push(SimPublish {
            topic: topic.into(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        self.subscriptions.push(topic.into());
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
