//! Socket.IO connection type: wraps an `rust_socketio`
//! async client. Inbound events are decoded with the default JSON leaf
//! walker, honouring the `{value, timestamp}` leaf convention that this
//! transport popularised.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as SyncRwLock;

use async_trait::async_trait;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;

use r2e_core::connection::{
    emit_status_changed, ConfigSchema, Connection, ConnectionConfiguration, ConnectionDescriptor,
    ConnectionState, FieldType, InputConfiguration, OutputConfiguration, SchemaField, ValidationResult,
};
use r2e_core::events::DataReceivedEvent;
use r2e_core::DataPoint;
use r2e_events::EventBus;
use r2e_utils::decode_leaves;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketIoConfig {
    url: String,
    #[serde(default)]
    base_path: String,
    #[serde(default)]
    auth: Option<Value>,
}

struct Inner {
    client: Option<Client>,
    forwarder: Option<JoinHandle<()>>,
}

pub struct SocketIoConnection {
    id: String,
    bus: EventBus,
    state: SyncRwLock<ConnectionState>,
    inner: Mutex<Inner>,
    data_tx: broadcast::Sender<DataReceivedEvent>,
    inputs: AsyncRwLock<HashMap<String, InputConfiguration>>,
    outputs: AsyncRwLock<HashMap<String, OutputConfiguration>>,
    base_path: AsyncRwLock<String>,
}

impl SocketIoConnection {
    fn new(id: String, bus: EventBus) -> Self {
        let (data_tx, _rx) = broadcast::channel(1024);
        Self {
            id,
            bus,
            state: SyncRwLock::new(ConnectionState::Disconnected),
            inner: Mutex::new(Inner { client: None, forwarder: None }),
            data_tx,
            inputs: AsyncRwLock::new(HashMap::new()),
            outputs: AsyncRwLock::new(HashMap::new()),
            base_path: AsyncRwLock::new(String::new()),
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

    fn spawn_forwarder(
        id: String,
        base_path: String,
        mut rx: mpsc::UnboundedReceiver<(String, Payload)>,
        data_tx: broadcast::Sender<DataReceivedEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((event, payload)) = rx.recv().await {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                let values: Vec<Value> = match payload {
                    Payload::Text(values) => values,
                    Payload::Binary(_) => {
                        tracing::warn!(connection_id = %id, event, "dropping binary Socket.IO payload");
                        continue;
                    }
                    #[allow(unreachable_patterns)]
                    _ => continue,
                };
                let root = if base_path.is_empty() {
                    event.clone()
                } else {
                    format!("{base_path}/{event}")
                };
                for value in values {
                    for leaf in decode_leaves(&root, &value) {
                        let point = DataPoint::new(
                            leaf.topic,
                            leaf.value,
                            id.clone(),
                            "socketio",
                            leaf.timestamp_ms.unwrap_or(now),
                        );
                        let _ = data_tx.send(DataReceivedEvent {
                            point,
                            input_id: "raw".into(),
                        });
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Connection for SocketIoConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    async fn initialize(&self, config: ConnectionConfiguration) -> bool {
        let parsed: Result<SocketIoConfig, _> = serde_json::from_value(config.typed_config.clone());
        let Ok(cfg) = parsed else {
            self.set_state(ConnectionState::Error, Some("invalid Socket.IO configuration".into())).await;
            return false;
        };
        *self.base_path.write().await = cfg.base_path.clone();

        let (tx, rx) = mpsc::unbounded_channel::<(String, Payload)>();
        let forwarder = Self::spawn_forwarder(self.id.clone(), cfg.base_path.clone(), rx, self.data_tx.clone());

        let filters: Vec<String> = config
            .inputs
            .iter()
            .filter(|i| i.is_enabled)
            .map(|i| i.filter.clone())
            .collect();
        let filters = if filters.is_empty() { vec!["message".to_string()] } else { filters };

        let mut builder = ClientBuilder::new(cfg.url.clone());
        if let Some(auth) = cfg.auth.clone() {
            builder = builder.auth(auth);
        }
        for event in &filters {
            let event_name = event.clone();
            let forward = tx.clone();
            builder = builder.on(event.as_str(), move |payload, _client| {
                let event_name = event_name.clone();
                let forward = forward.clone();
                Box::pin(async move {
                    let _ = forward.send((event_name, payload));
                })
            });
        }

        let client = match builder.connect().await {
            Ok(client) => client,
            Err(err) => {
                forwarder.abort();
                self.set_state(ConnectionState::Error, Some(format!("connect failed: {err}"))).await;
                return false;
            }
        };

        let mut inner = self.inner.lock().await;
        inner.client = Some(client);
        inner.forwarder = Some(forwarder);
        drop(inner);

        for input in config.inputs {
            self.inputs.write().await.insert(input.id.clone(), input);
        }
        for output in config.outputs {
            self.outputs.write().await.insert(output.id.clone(), output);
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
        if let Some(forwarder) = inner.forwarder.take() {
            forwarder.abort();
        }
        if let Some(client) = inner.client.take() {
            let _ = client.disconnect().await;
        }
        drop(inner);
        self.set_state(ConnectionState::Disconnected, None).await;
        true
    }

    /// Socket.IO subscriptions are bound at connect time (the client
    /// registers its event callbacks once); adding an input after
    /// `initialize` takes effect only for outbound fan-out bookkeeping.
    async fn configure_input(&self, cfg: InputConfiguration) -> bool {
        self.inputs.write().await.insert(cfg.id.clone(), cfg);
        true
    }

    async fn remove_input(&self, id: &str) -> bool {
        self.inputs.write().await.remove(id).is_some()
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
            .emit(topic, Payload::Binary(bytes.to_vec().into()))
            .await
            .is_ok()
    }

    fn validate_configuration(&self, config: &ConnectionConfiguration) -> ValidationResult {
        let mut errors = Vec::new();
        match serde_json::from_value::<SocketIoConfig>(config.typed_config.clone()) {
            Ok(cfg) if cfg.url.trim().is_empty() => errors.push("url must not be empty".to_string()),
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

pub struct SocketIoDescriptor;

impl ConnectionDescriptor for SocketIoDescriptor {
    fn connection_type(&self) -> &str {
        "socketio"
    }

    fn display_name(&self) -> &str {
        "Socket.IO"
    }

    fn connection_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![
                SchemaField {
                    name: "url".into(),
                    display_name: "Server URL".into(),
                    field_type: FieldType::Url,
                    required: true,
                    default: None,
                    options: None,
                    group: "connection".into(),
                    order: 0,
                    is_secret: false,
                },
                SchemaField {
                    name: "basePath".into(),
                    display_name: "Base namespace path".into(),
                    field_type: FieldType::Text,
                    required: false,
                    default: None,
                    options: None,
                    group: "connection".into(),
                    order: 1,
                    is_secret: false,
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
        serde_json::json!({"url": "http://localhost:3000"})
    }

    fn create(&self, connection_id: String, bus: EventBus) -> Arc<dyn Connection> {
        Arc::new(SocketIoConnection::new(connection_id, bus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_fails_validation() {
        let descriptor = SocketIoDescriptor;
        let bus = EventBus::new();
        let conn = descriptor.create("sio-1".into(), bus);
        let config = ConnectionConfiguration {
            id: "sio-1".into(),
            connection_type: "socketio".into(),
            name: "sio-1".into(),
            is_enabled: true,
            auto_start: true,
            typed_config: serde_json::json!({"url": ""}),
            inputs: vec![],
            outputs: vec![],
        };
        let result = conn.validate_configuration(&config);
        assert!(!result.valid);
    }
}
