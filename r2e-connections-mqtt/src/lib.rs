//! MQTT connection type: wraps an `rumqttc` client behind
//! the shared [`Connection`] trait, decoding inbound payloads with the
//! default JSON leaf walker and re-serialising outbound points per output
//! configuration.

use std::collections::HashMap;
use std::sync::RwLock as SyncRwLock;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;

use r2e_core::connection::{
    emit_status_changed, ConfigSchema, Connection, ConnectionConfiguration, ConnectionDescriptor,
    ConnectionState, FieldType, InputConfiguration, OutputConfiguration, SchemaField,
    ValidationResult,
};
use r2e_core::events::DataReceivedEvent;
use r2e_core::{AppError, DataPoint};
use r2e_events::EventBus;
use r2e_utils::decode_leaves_from_bytes;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MqttConfig {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_client_id")]
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    use_tls: bool,
    #[serde(default = "default_keep_alive")]
    keep_alive_secs: u64,
    /// Prefix prepended to the connection's base namespace path when
    /// decoding inbound payloads into topics.
    #[serde(default)]
    base_topic: String,
}

fn default_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    format!("r2e-{}", uuid::Uuid::new_v4())
}
fn default_keep_alive() -> u64 {
    30
}

fn qos_from(qos: Option<u8>) -> QoS {
    match qos {
        Some(1) => QoS::AtLeastOnce,
        Some(2) => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

struct Inner {
    client: Option<AsyncClient>,
    poller: Option<JoinHandle<()>>,
}

pub struct MqttConnection {
    id: String,
    bus: EventBus,
    state: SyncRwLock<ConnectionState>,
    inner: Mutex<Inner>,
    data_tx: broadcast::Sender<DataReceivedEvent>,
    inputs: AsyncRwLock<HashMap<String, InputConfiguration>>,
    outputs: AsyncRwLock<HashMap<String, OutputConfiguration>>,
    base_topic: AsyncRwLock<String>,
}

impl MqttConnection {
    fn new(id: String, bus: EventBus) -> Self {
        let (data_tx, _rx) = broadcast::channel(1024);
        Self {
            id,
            bus,
            state: SyncRwLock::new(ConnectionState::Disconnected),
            inner: Mutex::new(Inner { client: None, poller: None }),
            data_tx,
            inputs: AsyncRwLock::new(HashMap::new()),
            outputs: AsyncRwLock::new(HashMap::new()),
            base_topic: AsyncRwLock::new(String::new()),
        }
    }

    async fn set_state(&self, new_state: ConnectionState, message: Option<String>) {
        let old_state = {
            let mut state = self.state.write().expect("state lock poisoned");
            let old = *state;
            *state = new_state;
            old
        };
        if old_state != new_state {
            emit_status_changed(&self.bus, &self.id, old_state, new_state, message).await;
        }
    }

    fn spawn_poller(id: String, mut eventloop: rumqttc::EventLoop, data_tx: broadcast::Sender<DataReceivedEvent>, base_topic: Arc<str>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(leaves) = decode_leaves_from_bytes(&base_topic, &publish.payload) else {
                            tracing::warn!(connection_id = %id, topic = %publish.topic, "dropping undecodable MQTT payload");
                            continue;
                        };
                        let now = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .map(|d| d.as_millis() as i64)
                            .unwrap_or(0);
                        for leaf in leaves {
                            let point = DataPoint::new(
                                format!("{}/{}", publish.topic, leaf.topic).trim_matches('/').to_string(),
                                leaf.value,
                                id.clone(),
                                "mqtt",
                                leaf.timestamp_ms.unwrap_or(now),
                            );
                            let _ = data_tx.send(DataReceivedEvent {
                                point,
                                input_id: "raw".into(),
                            });
                        }
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::warn!(connection_id = %id, error = %err, "MQTT event loop error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Connection for MqttConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    async fn initialize(&self, config: ConnectionConfiguration) -> bool {
        let parsed: Result<MqttConfig, _> = serde_json::from_value(config.typed_config.clone());
        let Ok(cfg) = parsed else {
            self.set_state(ConnectionState::Error, Some("invalid MQTT configuration".into())).await;
            return false;
        };
        *self.base_topic.write().await = cfg.base_topic.clone();

        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
        if let (Some(username), Some(password)) = (cfg.username.clone(), cfg.password.clone()) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 128);
        let poller = Self::spawn_poller(self.id.clone(), eventloop, self.data_tx.clone(), Arc::from(cfg.base_topic.as_str()));

        let mut inner = self.inner.lock().await;
        inner.client = Some(client);
        inner.poller = Some(poller);
        drop(inner);

        for input in config.inputs {
            self.configure_input(input).await;
        }
        for output in config.outputs {
            self.configure_output(output).await;
        }
        true
    }

    async fn start(&self) -> bool {
        self.set_state(ConnectionState::Connecting, None).await;
        if self.inner.lock().await.client.is_none() {
            self.set_state(ConnectionState::Error, Some("start called before initialize".into())).await;
            return false;
        }
        self.set_state(ConnectionState::Connected, None).await;
        true
    }

    async fn stop(&self) -> bool {
        self.set_state(ConnectionState::Stopping, None).await;
        let mut inner = self.inner.lock().await;
        if let Some(poller) = inner.poller.take() {
            poller.abort();
        }
        if let Some(client) = inner.client.take() {
            let _ = client.disconnect().await;
        }
        drop(inner);
        self.set_state(ConnectionState::Disconnected, None).await;
        true
    }

    async fn configure_input(&self, cfg: InputConfiguration) -> bool {
        let Some(client) = self.inner.lock().await.client.clone() else {
            return false;
        };
        if cfg.is_enabled && client.subscribe(&cfg.filter, qos_from(cfg.qos)).await.is_err() {
            return false;
        }
        self.inputs.write().await.insert(cfg.id.clone(), cfg);
        true
    }

    async fn remove_input(&self, id: &str) -> bool {
        let mut inputs = self.inputs.write().await;
        let Some(input) = inputs.remove(id) else {
            return false;
        };
        drop(inputs);
        if let Some(client) = self.inner.lock().await.client.clone() {
            let _ = client.unsubscribe(&input.filter).await;
        }
        true
    }

    async fn configure_output(&self, cfg: OutputConfiguration) -> bool {
        self.outputs.write().await.insert(cfg.id.clone(), cfg);
        true
    }

    async fn remove_output(&self, id: &str) -> bool {
        self.outputs.write().await.remove(id).is_some()
    }

    async fn send_data(&self, topic: &str, bytes: &[u8], _output_id: Option<&str>) -> bool {
        let Some(client) = self.inner.lock().await.client.clone() else {
            return false;
        };
        client
            .publish(topic, QoS::AtLeastOnce, false, bytes.to_vec())
            .await
            .is_ok()
    }

    fn validate_configuration(&self, config: &ConnectionConfiguration) -> ValidationResult {
        let mut errors = Vec::new();
        match serde_json::from_value::<MqttConfig>(config.typed_config.clone()) {
            Ok(cfg) if cfg.host.trim().is_empty() => errors.push("host must not be empty".to_string()),
            Err(e) => errors.push(format!("invalid configuration: {e}")),
            _ => {}
        }
        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings: vec![],
        }
    }

    fn subscribe_data(&self) -> Option<broadcast::Receiver<DataReceivedEvent>> {
        Some(self.data_tx.subscribe())
    }
}

pub struct MqttDescriptor;

impl ConnectionDescriptor for MqttDescriptor {
    fn connection_type(&self) -> &str {
        "mqtt"
    }

    fn display_name(&self) -> &str {
        "MQTT"
    }

    fn connection_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![
                SchemaField {
                    name: "host".into(),
                    display_name: "Broker host".into(),
                    field_type: FieldType::Text,
                    required: true,
                    default: None,
                    options: None,
                    group: "connection".into(),
                    order: 0,
                    is_secret: false,
                },
                SchemaField {
                    name: "port".into(),
                    display_name: "Broker port".into(),
                    field_type: FieldType::Number,
                    required: false,
                    default: Some(Value::from(1883)),
                    options: None,
                    group: "connection".into(),
                    order: 1,
                    is_secret: false,
                },
                SchemaField {
                    name: "username".into(),
                    display_name: "Username".into(),
                    field_type: FieldType::Text,
                    required: false,
                    default: None,
                    options: None,
                    group: "auth".into(),
                    order: 2,
                    is_secret: false,
                },
                SchemaField {
                    name: "password".into(),
                    display_name: "Password".into(),
                    field_type: FieldType::Password,
                    required: false,
                    default: None,
                    options: None,
                    group: "auth".into(),
                    order: 3,
                    is_secret: true,
                },
            ],
            groups: vec![],
        }
    }

    fn input_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    fn output_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    fn default_config(&self) -> Value {
        serde_json::json!({"host": "localhost", "port": 1883})
    }

    fn create(&self, connection_id: String, bus: EventBus) -> Arc<dyn Connection> {
        Arc::new(MqttConnection::new(connection_id, bus))
    }
}

/// Surfaces errors at the boundary that would otherwise be swallowed by the
/// `bool`-returning `Connection` methods, for callers that want a reason.
pub fn describe_init_failure(config: &ConnectionConfiguration) -> AppError {
    match serde_json::from_value::<MqttConfig>(config.typed_config.clone()) {
        Ok(_) => AppError::Transport("MQTT broker unreachable".into()),
        Err(e) => AppError::validation(format!("invalid MQTT configuration: {e}")),
    }
}
