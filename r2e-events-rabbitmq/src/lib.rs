//! RabbitMQ connection type: a pluggable [`Connection`]
//! backed by `lapin`, for sites that front their OT data with a durable
//! AMQP queue rather than MQTT.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as SyncRwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection as AmqpConnection, ConnectionProperties, ExchangeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use tokio_executor_trait::Tokio as TokioExecutor;
use tokio_reactor_trait::Tokio as TokioReactor;

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
struct RabbitMqConfig {
    amqp_uri: String,
    #[serde(default = "default_exchange")]
    exchange: String,
    #[serde(default)]
    base_topic: String,
}

fn default_exchange() -> String {
    "r2e".to_string()
}

struct Inner {
    channel: Option<lapin::Channel>,
    consumer_task: Option<JoinHandle<()>>,
}

pub struct RabbitMqConnection {
    id: String,
    bus: EventBus,
    state: SyncRwLock<ConnectionState>,
    inner: Mutex<Inner>,
    data_tx: broadcast::Sender<DataReceivedEvent>,
    inputs: AsyncRwLock<HashMap<String, InputConfiguration>>,
    outputs: AsyncRwLock<HashMap<String, OutputConfiguration>>,
    exchange: AsyncRwLock<String>,
    base_topic: AsyncRwLock<String>,
}

impl RabbitMqConnection {
    fn new(id: String, bus: EventBus) -> Self {
        let (data_tx, _rx) = broadcast::channel(1024);
        Self {
            id,
            bus,
            state: SyncRwLock::new(ConnectionState::Disconnected),
            inner: Mutex::new(Inner { channel: None, consumer_task: None }),
            data_tx,
            inputs: AsyncRwLock::new(HashMap::new()),
            outputs: AsyncRwLock::new(HashMap::new()),
            exchange: AsyncRwLock::new(String::new()),
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
        mut consumer: lapin::Consumer,
        base_topic: Arc<str>,
        data_tx: broadcast::Sender<DataReceivedEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        tracing::warn!(connection_id = %id, error = %err, "RabbitMQ consumer error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                let routing_key = delivery.routing_key.to_string();
                let Some(leaves) = decode_leaves_from_bytes(&base_topic, &delivery.data) else {
                    tracing::warn!(connection_id = %id, "dropping undecodable RabbitMQ payload");
                    let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
                    continue;
                };
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                for leaf in leaves {
                    let point = DataPoint::new(
                        format!("{routing_key}/{}", leaf.topic).trim_matches('/').to_string(),
                        leaf.value,
                        id.clone(),
                        "rabbitmq",
                        leaf.timestamp_ms.unwrap_or(now),
                    );
                    let _ = data_tx.send(DataReceivedEvent { point, input_id: "raw".into() });
                }
                let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
            }
        })
    }
}

#[async_trait]
impl Connection for RabbitMqConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    async fn initialize(&self, config: ConnectionConfiguration) -> bool {
        let parsed: Result<RabbitMqConfig, _> = serde_json::from_value(config.typed_config.clone());
        let Ok(cfg) = parsed else {
            self.set_state(ConnectionState::Error, Some("invalid RabbitMQ configuration".into())).await;
            return false;
        };
        *self.base_topic.write().await = cfg.base_topic.clone();
        *self.exchange.write().await = cfg.exchange.clone();

        let conn = AmqpConnection::connect(
            &cfg.amqp_uri,
            ConnectionProperties::default()
                .with_executor(TokioExecutor::current())
                .with_reactor(TokioReactor),
        )
        .await;
        let Ok(conn) = conn else {
            self.set_state(ConnectionState::Error, Some("failed to connect to RabbitMQ".into())).await;
            return false;
        };
        let Ok(channel) = conn.create_channel().await else {
            self.set_state(ConnectionState::Error, Some("failed to open RabbitMQ channel".into())).await;
            return false;
        };
        if channel
            .exchange_declare(
                &cfg.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .is_err()
        {
            self.set_state(ConnectionState::Error, Some("failed to declare RabbitMQ exchange".into())).await;
            return false;
        }

        let mut consumer_task = None;
        if let Some(input) = config.inputs.iter().find(|i| i.is_enabled) {
            let queue_name = format!("r2e.{}.{}", self.id, input.id);
            let queue = channel
                .queue_declare(&queue_name, QueueDeclareOptions::default(), FieldTable::default())
                .await;
            let bound = match queue {
                Ok(queue) => channel
                    .queue_bind(
                        queue.name().as_str(),
                        &cfg.exchange,
                        &input.filter,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .is_ok(),
                Err(_) => false,
            };
            if !bound {
                self.set_state(ConnectionState::Error, Some("failed to bind RabbitMQ queue".into())).await;
                return false;
            }
            let consumer = channel
                .basic_consume(
                    &queue_name,
                    &format!("r2e-{}", self.id),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await;
            match consumer {
                Ok(consumer) => {
                    consumer_task = Some(Self::spawn_consumer(
                        self.id.clone(),
                        consumer,
                        Arc::from(cfg.base_topic.as_str()),
                        self.data_tx.clone(),
                    ));
                }
                Err(_) => {
                    self.set_state(ConnectionState::Error, Some("failed to start RabbitMQ consumer".into())).await;
                    return false;
                }
            }
        }

        let mut inner = self.inner.lock().await;
        inner.channel = Some(channel);
        inner.consumer_task = consumer_task;
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
        if self.inner.lock().await.channel.is_none() {
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
        inner.channel = None;
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
        let channel = {
            let inner = self.inner.lock().await;
            let Some(channel) = inner.channel.clone() else { return false };
            channel
        };
        let exchange = self.exchange.read().await.clone();
        channel
            .basic_publish(
                &exchange,
                topic,
                BasicPublishOptions::default(),
                bytes,
                BasicProperties::default(),
            )
            .await
            .is_ok()
    }

    fn validate_configuration(&self, config: &ConnectionConfiguration) -> ValidationResult {
        let mut errors = Vec::new();
        match serde_json::from_value::<RabbitMqConfig>(config.typed_config.clone()) {
            Ok(cfg) if cfg.amqp_uri.trim().is_empty() => errors.push("amqpUri must not be empty".to_string()),
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

pub struct RabbitMqDescriptor;

impl ConnectionDescriptor for RabbitMqDescriptor {
    fn connection_type(&self) -> &str {
        "rabbitmq"
    }

    fn display_name(&self) -> &str {
        "RabbitMQ"
    }

    fn connection_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![
                SchemaField {
                    name: "amqpUri".into(),
                    display_name: "AMQP URI".into(),
                    field_type: FieldType::Url,
                    required: true,
                    default: None,
                    options: None,
                    group: "connection".into(),
                    order: 0,
                    is_secret: false,
                },
                SchemaField {
                    name: "exchange".into(),
                    display_name: "Exchange".into(),
                    field_type: FieldType::Text,
                    required: false,
                    default: Some(Value::String("r2e".into())),
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
        serde_json::json!({"amqpUri": "amqp://127.0.0.1:5672/%2f", "exchange": "r2e"})
    }

    fn create(&self, connection_id: String, bus: EventBus) -> Arc<dyn Connection> {
        Arc::new(RabbitMqConnection::new(connection_id, bus))
    }
}
