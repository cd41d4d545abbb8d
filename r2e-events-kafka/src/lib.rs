//! Kafka connection type: a pluggable [`Connection`]
//! backed by `rdkafka`, demonstrating the hub talking to an IT-side
//! message bus rather than an OT protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as SyncRwLock;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;

use r2e_core::connection::{
    emit_status_changed, ConfigSchema, Connection, ConnectionConfiguration, ConnectionDescriptor,
    ConnectionState, FieldType, InputConfiguration, OutputConfiguration, SchemaField, ValidationResult,
};
use r2e_core::events::DataReceivedEvent;
use r2e_core::DataPoint;
use r2e_events::EventBus;
use r2e_utils::decode_leaves_from_bytes;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KafkaConfig {
    bootstrap_servers: String,
    #[serde(default = "default_group_id")]
    group_id: String,
    #[serde(default)]
    base_topic: String,
}

fn default_group_id() -> String {
    "r2e-hub".to_string()
}

struct Inner {
    producer: Option<FutureProducer>,
    consumer_task: Option<JoinHandle<()>>,
}

pub struct KafkaConnection {
    id: String,
    bus: EventBus,
    state: SyncRwLock<ConnectionState>,
    inner: Mutex<Inner>,
    data_tx: broadcast::Sender<DataReceivedEvent>,
    inputs: AsyncRwLock<HashMap<String, InputConfiguration>>,
    outputs: AsyncRwLock<HashMap<String, OutputConfiguration>>,
    base_topic: AsyncRwLock<String>,
}

impl KafkaConnection {
    fn new(id: String, bus: EventBus) -> Self {
        let (data_tx, _rx) = broadcast::channel(1024);
        Self {
            id,
            bus,
            state: SyncRwLock::new(ConnectionState::Disconnected),
            inner: Mutex::new(Inner { producer: None, consumer_task: None }),
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

    fn spawn_consumer(
        id: String,
        consumer: StreamConsumer,
        base_topic: Arc<str>,
        data_tx: broadcast::Sender<DataReceivedEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let Some(payload) = message.payload() else { continue };
                        let Some(leaves) = decode_leaves_from_bytes(&base_topic, payload) else {
                            tracing::warn!(connection_id = %id, "dropping undecodable Kafka payload");
                            continue;
                        };
                        let now = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .map(|d| d.as_millis() as i64)
                            .unwrap_or(0);
                        let source_topic = message.topic().to_string();
                        for leaf in leaves {
                            let point = DataPoint::new(
                                format!("{source_topic}/{}", leaf.topic).trim_matches('/').to_string(),
                                leaf.value,
                                id.clone(),
                                "kafka",
                                leaf.timestamp_ms.unwrap_or(now),
                            );
                            let _ = data_tx.send(DataReceivedEvent { point, input_id: "raw".into() });
                        }
                    }
                    Err(err) => {
                        tracing::warn!(connection_id = %id, error = %err, "Kafka consumer error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Connection for KafkaConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    async fn initialize(&self, config: ConnectionConfiguration) -> bool {
        let parsed: Result<KafkaConfig, _> = serde_json::from_value(config.typed_config.clone());
        let Ok(cfg) = parsed else {
            self.set_state(ConnectionState::Error, Some("invalid Kafka configuration".into())).await;
            return false;
        };
        *self.base_topic.write().await = cfg.base_topic.clone();

        let producer: Result<FutureProducer, _> = ClientConfig::new()
            .set("bootstrap.servers", &cfg.bootstrap_servers)
            .create();
        let Ok(producer) = producer else {
            self.set_state(ConnectionState::Error, Some("failed to create Kafka producer".into())).await;
            return false;
        };

        let consumer: Result<StreamConsumer, _> = ClientConfig::new()
            .set("bootstrap.servers", &cfg.bootstrap_servers)
            .set("group.id", &cfg.group_id)
            .set("enable.auto.commit", "true")
            .create();
        let Ok(consumer) = consumer else {
            self.set_state(ConnectionState::Error, Some("failed to create Kafka consumer".into())).await;
            return false;
        };

        let topics: Vec<String> = config
            .inputs
            .iter()
            .filter(|i| i.is_enabled)
            .map(|i| i.filter.clone())
            .collect();
        if !topics.is_empty() {
            let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            if consumer.subscribe(&refs).is_err() {
                self.set_state(ConnectionState::Error, Some("failed to subscribe to Kafka topics".into())).await;
                return false;
            }
        }

        let consumer_task = Self::spawn_consumer(
            self.id.clone(),
            consumer,
            Arc::from(cfg.base_topic.as_str()),
            self.data_tx.clone(),
        );

        let mut inner = self.inner.lock().await;
        inner.producer = Some(producer);
        inner.consumer_task = Some(consumer_task);
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
        if self.inner.lock().await.producer.is_none() {
            self.set_state(ConnectionState::Error, Some("start called before initialize".into())).await;
            return false;
        }
        self.set_state(ConnectionState::Connected, None).await;
        true
    }

    async fn stop(&self) -> bool {
        self.set_state(ConnectionState::Stopping, None).await;
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.consumer_task.take() {
            task.abort();
        }
        inner.producer = None;
        drop(inner);
        self.set_state(ConnectionState::Disconnected, None).await;
        true
    }

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
        let producer = {
            let inner = self.inner.lock().await;
            let Some(producer) = inner.producer.clone() else { return false };
            producer
        };
        let record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(bytes);
        producer.send(record, Duration::from_secs(5)).await.is_ok()
    }

    fn validate_configuration(&self, config: &ConnectionConfiguration) -> ValidationResult {
        let mut errors = Vec::new();
        match serde_json::from_value::<KafkaConfig>(config.typed_config.clone()) {
            Ok(cfg) if cfg.bootstrap_servers.trim().is_empty() => {
                errors.push("bootstrapServers must not be empty".to_string())
            }
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

pub struct KafkaDescriptor;

impl ConnectionDescriptor for KafkaDescriptor {
    fn connection_type(&self) -> &str {
        "kafka"
    }

    fn display_name(&self) -> &str {
        "Apache Kafka"
    }

    fn connection_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![
                SchemaField {
                    name: "bootstrapServers".into(),
                    display_name: "Bootstrap servers".into(),
                    field_type: FieldType::Text,
                    required: true,
                    default: None,
                    options: None,
                    group: "connection".into(),
                    order: 0,
                    is_secret: false,
                },
                SchemaField {
                    name: "groupId".into(),
                    display_name: "Consumer group".into(),
                    field_type: FieldType::Text,
                    required: false,
                    default: Some(Value::String("r2e-hub".into())),
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
        serde_json::json!({"bootstrapServers": "localhost:9092"})
    }

    fn create(&self, connection_id: String, bus: EventBus) -> Arc<dyn Connection> {
        Arc::new(KafkaConnection::new(connection_id, bus))
    }
}
