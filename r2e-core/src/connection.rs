//! Connection runtime: descriptor/instance pair, state machine, and the
//! multi-subscriber connection manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use r2e_events::EventBus;
use r2e_utils::topic_matches;

use crate::error::AppError;
use crate::events::{DataReceivedEvent, StatusChangedEvent};

/// Connection lifecycle state. `Error` is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disabled,
    Connecting,
    Connected,
    Error,
    Stopping,
    Disconnected,
}

/// A configuration field's UI type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    TextArea,
    Password,
    Number,
    Boolean,
    Select,
    MultiSelect,
    DateTime,
    Json,
    File,
    Url,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub display_name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub options: Option<Vec<String>>,
    pub group: String,
    pub order: u32,
    pub is_secret: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaGroup {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub order: u32,
    pub collapsible: bool,
    pub collapsed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<SchemaField>,
    pub groups: Vec<SchemaGroup>,
}

impl ConfigSchema {
    /// Mask every field flagged `is_secret` in a JSON document for display
    ///. Secret fields are never round-tripped in plaintext.
    pub fn masked(&self, config: &Value) -> Value {
        let mut masked = config.clone();
        if let Some(obj) = masked.as_object_mut() {
            for field in self.fields.iter().filter(|f| f.is_secret) {
                if obj.contains_key(&field.name) {
                    obj.insert(field.name.clone(), Value::String("••••••••".into()));
                }
            }
        }
        masked
    }
}

/// Result of `validate_configuration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Serialisation format used by an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    Raw,
    Json,
    Xml,
    SparkplugB,
    MessagePack,
}

/// A per-connection subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfiguration {
    pub id: String,
    pub is_enabled: bool,
    /// Topic filter glob (MQTT-style) or Socket.IO event name.
    pub filter: String,
    pub qos: Option<u8>,
    pub format: DataFormat,
}

/// A per-connection publication rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfiguration {
    pub id: String,
    pub is_enabled: bool,
    pub filter: String,
    pub format: DataFormat,
    pub emit_on_change: bool,
    pub min_emit_interval_ms: u64,
    pub use_uns_path_as_topic: bool,
    pub topic_prefix: Option<String>,
    pub include_timestamp: bool,
    pub include_quality: bool,
    /// Model-publishing variant: periodically emits the
    /// namespace structure instead of per-point data, under this attribute
    /// name. Not gated by change detection or `min_emit_interval_ms`.
    pub is_model_export: bool,
    pub model_attribute_name: Option<String>,
    pub republish_interval_minutes: Option<u32>,
}

/// Connection-type-specific settings plus attached inputs/outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfiguration {
    pub id: String,
    pub connection_type: String,
    pub name: String,
    pub is_enabled: bool,
    pub auto_start: bool,
    pub typed_config: Value,
    pub inputs: Vec<InputConfiguration>,
    pub outputs: Vec<OutputConfiguration>,
}

/// The capability set every concrete connection implements.
///
/// Transitions are observable via [`Connection::state`] and the
/// `StatusChanged` event each connection is expected to emit through the
/// bus handed to it at construction.
#[async_trait]
pub trait Connection: Send + Sync {
    fn connection_id(&self) -> &str;
    fn state(&self) -> ConnectionState;

    async fn initialize(&self, config: ConnectionConfiguration) -> bool;
    async fn start(&self) -> bool;
    async fn stop(&self) -> bool;

    /// Forced stop with a bounded grace period, then resource release
    ///. Default: `stop()` with a 10s timeout.
    async fn dispose(&self) {
        let _ = tokio::time::timeout(Duration::from_secs(10), self.stop()).await;
    }

    async fn configure_input(&self, cfg: InputConfiguration) -> bool;
    async fn remove_input(&self, id: &str) -> bool;
    async fn configure_output(&self, cfg: OutputConfiguration) -> bool;
    async fn remove_output(&self, id: &str) -> bool;

    /// Send an already-serialised `(topic, bytes)` pair — built by
    /// [`crate::publisher::OutputPublisher`] honoring the output's
    /// `dataFormat`/`includeTimestamp`/`includeQuality` — to the transport.
    /// `output_id` is passed through for connections whose outbound
    /// resources (e.g. a pre-bound producer) are keyed per output rather
    /// than addressed by topic string at send time.
    async fn send_data(&self, topic: &str, bytes: &[u8], output_id: Option<&str>) -> bool;

    fn validate_configuration(&self, config: &ConnectionConfiguration) -> ValidationResult;

    /// A receiver of this connection's raw `DataReceivedEvent`s, used by
    /// [`ConnectionManager`] to fan out to subscribers. Connections that
    /// never produce inbound data (pure sinks) can return `None`.
    fn subscribe_data(&self) -> Option<broadcast::Receiver<DataReceivedEvent>> {
        None
    }
}

/// Static metadata plus a factory for a connection type.
pub trait ConnectionDescriptor: Send + Sync {
    fn connection_type(&self) -> &str;
    fn display_name(&self) -> &str;
    fn connection_schema(&self) -> ConfigSchema;
    fn input_schema(&self) -> ConfigSchema;
    fn output_schema(&self) -> ConfigSchema;
    fn default_config(&self) -> Value;

    /// Construct a fresh, uninitialised connection instance.
    fn create(&self, connection_id: String, bus: EventBus) -> Arc<dyn Connection>;
}

struct SubscriberState {
    inputs: HashMap<String, InputConfiguration>,
    sender: broadcast::Sender<DataReceivedEvent>,
}

struct SharedConnection {
    connection: Arc<dyn Connection>,
    refcount: AtomicUsize,
    subscribers: RwLock<HashMap<String, SubscriberState>>,
}

/// Shares one underlying transport per `connection_id` among many
/// subscribers. Invariants: at most one live transport per
/// `connection_id`; subscribers never see each other's data; a
/// reconfiguration by one subscriber never invalidates another's.
pub struct ConnectionManager {
    bus: EventBus,
    factories: RwLock<HashMap<String, Arc<dyn ConnectionDescriptor>>>,
    shared: RwLock<HashMap<String, Arc<SharedConnection>>>,
}

/// A scoped handle returned by [`ConnectionManager::acquire`]. Dropping it
/// does not release the connection — callers must call
/// [`ConnectionManager::release`] explicitly, since release is async
/// (it may tear down the transport).
pub struct ConnectionHandle {
    pub connection_id: String,
    pub subscriber_id: String,
    connection: Arc<dyn Connection>,
    data: broadcast::Receiver<DataReceivedEvent>,
}

impl ConnectionHandle {
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Receive the next `DataReceivedEvent` matching one of this
    /// subscriber's own input filters. Other subscribers' data is never
    /// observed here.
    pub async fn recv(&mut self) -> Option<DataReceivedEvent> {
        self.data.recv().await.ok()
    }
}

impl ConnectionManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            factories: RwLock::new(HashMap::new()),
            shared: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_descriptor(&self, descriptor: Arc<dyn ConnectionDescriptor>) {
        self.factories
            .write()
            .await
            .insert(descriptor.connection_type().to_string(), descriptor);
    }

    /// Create the underlying connection if absent, increment its refcount,
    /// return a scoped handle.
    pub async fn acquire(
        &self,
        connection_type: &str,
        connection_id: &str,
        config: ConnectionConfiguration,
        subscriber_id: &str,
    ) -> Result<ConnectionHandle, AppError> {
        let shared = {
            let existing = self.shared.read().await.get(connection_id).cloned();
            match existing {
                Some(s) => s,
                None => {
                    let descriptor = self
                        .factories
                        .read()
                        .await
                        .get(connection_type)
                        .cloned()
                        .ok_or_else(|| {
                            AppError::validation(format!("unknown connection type '{connection_type}'"))
                        })?;
                    let connection = descriptor.create(connection_id.to_string(), self.bus.clone());
                    if !connection.initialize(config.clone()).await {
                        return Err(AppError::validation(format!(
                            "connection '{connection_id}' failed to initialize"
                        )));
                    }
                    if !connection.start().await {
                        return Err(AppError::Transport(format!(
                            "connection '{connection_id}' failed to start"
                        )));
                    }
                    let shared = Arc::new(SharedConnection {
                        connection,
                        refcount: AtomicUsize::new(0),
                        subscribers: RwLock::new(HashMap::new()),
                    });
                    self.spawn_fanout(connection_id.to_string(), shared.clone());
                    self.shared
                        .write()
                        .await
                        .insert(connection_id.to_string(), shared.clone());
                    shared
                }
            }
        };

        shared.refcount.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = broadcast::channel(1024);
        shared.subscribers.write().await.insert(
            subscriber_id.to_string(),
            SubscriberState {
                inputs: HashMap::new(),
                sender: tx,
            },
        );

        for input in config.inputs {
            self.configure_input(connection_id, subscriber_id, input).await;
        }

        Ok(ConnectionHandle {
            connection_id: connection_id.to_string(),
            subscriber_id: subscriber_id.to_string(),
            connection: shared.connection.clone(),
            data: rx,
        })
    }

    /// Forward the shared connection's raw data stream into each
    /// subscriber's own broadcast channel, filtered by that subscriber's
    /// own inputs.
    fn spawn_fanout(&self, connection_id: String, shared: Arc<SharedConnection>) {
        let Some(mut raw) = shared.connection.subscribe_data() else {
            return;
        };
        tokio::spawn(async move {
            loop {
                match raw.recv().await {
                    Ok(event) => {
                        let subs = shared.subscribers.read().await;
                        for state in subs.values() {
                            let matched = state
                                .inputs
                                .values()
                                .any(|i| i.is_enabled && topic_matches(&i.filter, &event.point.source_topic, true));
                            if matched {
                                let _ = state.sender.send(event.clone());
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(connection_id, "connection fan-out task exiting");
        });
    }

    /// Decrements the refcount; when zero, stops the underlying transport.
    pub async fn release(&self, connection_id: &str, subscriber_id: &str) {
        let shared = self.shared.read().await.get(connection_id).cloned();
        let Some(shared) = shared else { return };
        shared.subscribers.write().await.remove(subscriber_id);
        if shared.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            shared.connection.dispose().await;
            self.shared.write().await.remove(connection_id);
        }
    }

    pub async fn configure_input(
        &self,
        connection_id: &str,
        subscriber_id: &str,
        input: InputConfiguration,
    ) -> bool {
        let Some(shared) = self.shared.read().await.get(connection_id).cloned() else {
            return false;
        };
        let scoped_id = format!("{subscriber_id}:{}", input.id);
        let mut scoped = input.clone();
        scoped.id = scoped_id.clone();
        let ok = shared.connection.configure_input(scoped).await;
        if ok {
            if let Some(state) = shared.subscribers.write().await.get_mut(subscriber_id) {
                state.inputs.insert(input.id.clone(), input);
            }
        }
        ok
    }

    pub async fn remove_input(&self, connection_id: &str, subscriber_id: &str, input_id: &str) -> bool {
        let Some(shared) = self.shared.read().await.get(connection_id).cloned() else {
            return false;
        };
        let scoped_id = format!("{subscriber_id}:{input_id}");
        let ok = shared.connection.remove_input(&scoped_id).await;
        if ok {
            if let Some(state) = shared.subscribers.write().await.get_mut(subscriber_id) {
                state.inputs.remove(input_id);
            }
        }
        ok
    }

    pub async fn live_transport_count(&self) -> usize {
        self.shared.read().await.len()
    }
}

/// Format and publish a `StatusChanged` event. Concrete
/// connections call this on every state transition.
pub async fn emit_status_changed(
    bus: &EventBus,
    connection_id: &str,
    old_state: ConnectionState,
    new_state: ConnectionState,
    message: Option<String>,
) {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    bus.emit(StatusChangedEvent {
        connection_id: connection_id.to_string(),
        old_state,
        new_state,
        message,
        timestamp,
    })
    .await;
}
