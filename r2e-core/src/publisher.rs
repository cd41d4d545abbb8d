//! Change-detection + rate-limited output publisher.
//!
//! Gates whether an incoming [`DataPoint`] should be sent to a given
//! output: topic-filter match, `emitOnChange` suppression, then
//! `minEmitIntervalMs` rate limiting. State commits only after the caller
//! confirms the transport accepted the send — a failed publish must not
//! advance `lastValue`/`lastEmitAt`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde_json::Value;

use crate::connection::{DataFormat, OutputConfiguration};
use crate::datapoint::{DataPoint, Quality};
use crate::hierarchy::HierarchicalPath;
use r2e_utils::topic_matches;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Default)]
struct PublishState {
    last_value: RwLock<Option<(Value, Quality)>>,
    last_emit_at: AtomicI64,
}

/// A publish that passed change-detection and rate-limiting, ready to hand
/// to the connection. The caller must call [`PendingPublish::commit`]
/// after the transport confirms the send succeeded, and must drop it
/// (without committing) on failure so a future attempt can retry.
pub struct PendingPublish<'a> {
    publisher: &'a OutputPublisher,
    key: (String, String),
    value: Value,
    quality: Quality,
    /// The instant `evaluate` made its decision — recorded as `lastEmitAt`
    /// on commit, rather than whenever the caller gets around to it.
    decided_at: i64,
    pub topic: String,
    pub bytes: Vec<u8>,
}

impl PendingPublish<'_> {
    pub fn commit(self) {
        if let Some(entry) = self.publisher.states.get(&self.key) {
            *entry.last_value.write().unwrap() = Some((self.value, self.quality));
            entry.last_emit_at.store(self.decided_at, Ordering::Relaxed);
        }
    }
}

/// Maintains per-`(outputId, topic)` change-detection and rate-limit state
/// across every output this process drives.
#[derive(Default)]
pub struct OutputPublisher {
    states: DashMap<(String, String), PublishState>,
}

impl OutputPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate whether `point` should be published to `output`. Returns
    /// `None` when the output's filter doesn't match, the value is an
    /// unchanged duplicate under `emit_on_change`, or the rate-limit
    /// window hasn't elapsed.
    pub fn evaluate(&self, output: &OutputConfiguration, point: &DataPoint) -> Option<PendingPublish<'_>> {
        self.evaluate_at(now_millis(), output, point)
    }

    /// Same as [`Self::evaluate`] with an explicit decision clock, so
    /// rate-limit windows can be driven deterministically in tests.
    fn evaluate_at(&self, now: i64, output: &OutputConfiguration, point: &DataPoint) -> Option<PendingPublish<'_>> {
        if !output.is_enabled {
            return None;
        }
        if !topic_matches(&output.filter, &point.source_topic, true) {
            return None;
        }

        let key = (output.id.clone(), point.source_topic.clone());

        {
            let entry = self.states.entry(key.clone()).or_default();
            if output.emit_on_change {
                if let Some((last_value, last_quality)) = entry.last_value.read().unwrap().as_ref() {
                    if values_equal(last_value, &point.value) && *last_quality == point.quality {
                        return None;
                    }
                }
            }
            let last_emit = entry.last_emit_at.load(Ordering::Relaxed);
            if last_emit != 0 && now.saturating_sub(last_emit) < output.min_emit_interval_ms as i64 {
                return None;
            }
        }

        let (topic, bytes) = render(output, point);

        Some(PendingPublish {
            publisher: self,
            key,
            value: point.value.clone(),
            quality: point.quality,
            decided_at: now,
            topic,
            bytes,
        })
    }

    #[cfg(test)]
    fn evaluate_for_test(&self, now: i64, output: &OutputConfiguration, point: &DataPoint) -> Option<PendingPublish<'_>> {
        self.evaluate_at(now, output, point)
    }
}

/// Deep-equal for primitives, string-compare for complex values.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(_), _) | (_, Value::Object(_)) | (Value::Array(_), _) | (_, Value::Array(_)) => {
            a.to_string() == b.to_string()
        }
        _ => a == b,
    }
}

/// Build the final `(topic, bytes)` pair a connection should send for
/// `point` against `output`: the wire topic per `useUNSPathAsTopic`/
/// `topicPrefix`, and the envelope serialised per `dataFormat`/
/// `includeTimestamp`/`includeQuality`. Shared by change-detection publish
/// and the model-republish job so no connection ever re-derives either.
pub fn render(output: &OutputConfiguration, point: &DataPoint) -> (String, Vec<u8>) {
    (construct_topic(output, point), serialize(output, point))
}

/// `hierarchicalPath.fullPath + "/" + unsName` when `useUNSPathAsTopic`,
/// else the original topic; both optionally prefixed.
pub fn construct_topic(output: &OutputConfiguration, point: &DataPoint) -> String {
    let base = if output.use_uns_path_as_topic {
        point
            .namespace_path
            .clone()
            .unwrap_or_else(|| point.source_topic.clone())
    } else {
        point.source_topic.clone()
    };
    match &output.topic_prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{base}"),
        _ => base,
    }
}

pub fn serialize(output: &OutputConfiguration, point: &DataPoint) -> Vec<u8> {
    let mut envelope = serde_json::Map::new();
    envelope.insert("value".to_string(), point.value.clone());
    if output.include_timestamp {
        envelope.insert("timestamp".to_string(), Value::from(point.timestamp));
    }
    if output.include_quality {
        envelope.insert(
            "quality".to_string(),
            serde_json::to_value(point.quality).unwrap_or(Value::Null),
        );
    }

    match output.format {
        DataFormat::Raw => match &point.value {
            Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        },
        DataFormat::Json => serde_json::to_vec(&envelope).unwrap_or_default(),
        DataFormat::Xml => to_xml(&envelope).into_bytes(),
        // Sparkplug B decoding is explicitly an unfinished pluggable codec
        // upstream; mirror that for encoding.
        DataFormat::SparkplugB => point.value.to_string().into_bytes(),
        DataFormat::MessagePack => to_msgpack(&envelope),
    }
}

/// Minimal, non-namespaced XML rendering of a flat envelope map.
fn to_xml(envelope: &serde_json::Map<String, Value>) -> String {
    let mut out = String::from("<dataPoint>");
    for (key, value) in envelope {
        let text = match value {
            Value::String(s) => escape_xml(s),
            other => escape_xml(&other.to_string()),
        };
        out.push_str(&format!("<{key}>{text}</{key}>"));
    }
    out.push_str("</dataPoint>");
    out
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal MessagePack encoder covering the scalar + flat-map shapes an
/// envelope can take; no crate in the dependency tree covers this format.
fn to_msgpack(envelope: &serde_json::Map<String, Value>) -> Vec<u8> {
    let mut out = Vec::new();
    msgpack_map(envelope, &mut out);
    out
}

fn msgpack_map(map: &serde_json::Map<String, Value>, out: &mut Vec<u8>) {
    out.push(0x80 | (map.len() as u8 & 0x0f));
    for (key, value) in map {
        msgpack_value(&Value::String(key.clone()), out);
        msgpack_value(value, out);
    }
}

fn msgpack_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xc0),
        Value::Bool(false) => out.push(0xc2),
        Value::Bool(true) => out.push(0xc3),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push(0xd3);
                out.extend_from_slice(&i.to_be_bytes());
            } else if let Some(f) = n.as_f64() {
                out.push(0xcb);
                out.extend_from_slice(&f.to_be_bytes());
            } else {
                out.push(0xc0);
            }
        }
        Value::String(s) => {
            let bytes = s.as_bytes();
            out.push(0xdb);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            out.push(0xdd);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                msgpack_value(item, out);
            }
        }
        Value::Object(map) => msgpack_map(map, out),
    }
}

/// Periodic, change-detection-independent export of the namespace
/// structure for outputs flagged `is_model_export`.
pub struct ModelDocument {
    pub attribute_name: String,
    pub payload: Value,
}

/// Build the model document for one model-exporting output from the
/// current namespace forest. Callers serialise/send it to the output's
/// connection on their own `republish_interval_minutes` timer.
pub fn build_model_document(
    output: &OutputConfiguration,
    forest: &[crate::namespace::NSTreeNode],
) -> ModelDocument {
    let attribute_name = output
        .model_attribute_name
        .clone()
        .unwrap_or_else(|| "namespace".to_string());
    let payload = serde_json::json!({
        attribute_name.clone(): forest.iter().map(tree_to_json).collect::<Vec<_>>(),
    });
    ModelDocument {
        attribute_name,
        payload,
    }
}

fn tree_to_json(node: &crate::namespace::NSTreeNode) -> Value {
    serde_json::json!({
        "name": node.name,
        "fullPath": node.full_path,
        "children": node.children.iter().map(tree_to_json).collect::<Vec<_>>(),
    })
}

/// Build a `HierarchicalPath`-derived output topic prefix combined with a
/// `unsName`, per the `useUNSPathAsTopic` rule — exposed for connections
/// that need the topic without going through a full `DataPoint`.
pub fn uns_path_topic(path: &HierarchicalPath, uns_name: &str) -> String {
    let base = path.full_path();
    if base.is_empty() {
        uns_name.to_string()
    } else {
        format!("{base}/{uns_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(id: &str, min_interval_ms: u64) -> OutputConfiguration {
        OutputConfiguration {
            id: id.into(),
            is_enabled: true,
            filter: "T".into(),
            format: DataFormat::Json,
            emit_on_change: true,
            min_emit_interval_ms: min_interval_ms,
            use_uns_path_as_topic: false,
            topic_prefix: None,
            include_timestamp: false,
            include_quality: false,
            is_model_export: false,
            model_attribute_name: None,
            republish_interval_minutes: None,
        }
    }

    fn point(value: f64, timestamp: i64) -> DataPoint {
        DataPoint::new("T", serde_json::json!(value), "conn-1", "plc", timestamp)
    }

    #[test]
    fn duplicate_value_produces_no_publish() {
        let publisher = OutputPublisher::new();
        let out = output("O", 0);
        let first = publisher.evaluate_for_test(0, &out, &point(23.5, 0));
        assert!(first.is_some());
        first.unwrap().commit();

        let second = publisher.evaluate_for_test(100, &out, &point(23.5, 100));
        assert!(second.is_none(), "unchanged value must not publish");
    }

    #[test]
    fn rate_limit_gap_enforced() {
        let publisher = OutputPublisher::new();
        let out = output("O", 1000);
        let first = publisher.evaluate_for_test(0, &out, &point(23.5, 0));
        assert!(first.is_some());
        first.unwrap().commit();

        // A changed value within the rate window is still suppressed.
        let too_soon = publisher.evaluate_for_test(200, &out, &point(24.0, 200));
        assert!(too_soon.is_none());
    }

    /// Values 23.5@t0, 23.5@t0+200, 24.0@t0+400,
    /// 24.0@t0+1500 over a 1000ms rate window — publishes only at t0 and
    /// ~t0+1400 (first allowed instant once both gates clear).
    #[test]
    fn publisher_suppression_sequence() {
        let publisher = OutputPublisher::new();
        let out = output("O", 1000);

        publisher.evaluate_for_test(0, &out, &point(23.5, 0)).unwrap().commit();
        assert!(publisher.evaluate_for_test(200, &out, &point(23.5, 200)).is_none());
        assert!(publisher.evaluate_for_test(400, &out, &point(24.0, 400)).is_none());
        let allowed = publisher.evaluate_for_test(1500, &out, &point(24.0, 1500));
        assert!(allowed.is_some());
        allowed.unwrap().commit();
        assert!(publisher.evaluate_for_test(1500, &out, &point(24.0, 1500)).is_none());
    }

    #[test]
    fn publish_is_allowed_once_rate_window_and_value_both_clear() {
        let publisher = OutputPublisher::new();
        let out = output("O", 1000);
        publisher.evaluate_for_test(0, &out, &point(23.5, 0)).unwrap().commit();

        // Still in-window dup attempts get skipped...
        assert!(publisher.evaluate_for_test(400, &out, &point(24.0, 400)).is_none());

        // ...but once 1000ms have elapsed and the value changed, it's allowed.
        let allowed = publisher.evaluate_for_test(1100, &out, &point(24.0, 1100));
        assert!(allowed.is_some());
    }

    #[test]
    fn non_matching_filter_never_publishes() {
        let publisher = OutputPublisher::new();
        let mut out = output("O", 0);
        out.filter = "other/topic".into();
        assert!(publisher.evaluate(&out, &point(1.0, 0)).is_none());
    }

    #[test]
    fn failed_publish_does_not_commit_state() {
        let publisher = OutputPublisher::new();
        let out = output("O", 1000);
        let pending = publisher.evaluate_for_test(0, &out, &point(23.5, 0)).unwrap();
        drop(pending); // simulate a failed send: never call commit()

        // lastEmitAt was never recorded, so an immediate retry is allowed.
        let retried = publisher.evaluate_for_test(1, &out, &point(23.5, 1));
        assert!(retried.is_some(), "uncommitted failure must allow a retry");
    }

    #[test]
    fn uns_path_topic_joins_path_and_name() {
        let path = HierarchicalPath::new(vec![("Enterprise".into(), "Acme".into())]);
        assert_eq!(uns_path_topic(&path, "Tag1"), "Acme/Tag1");
        assert_eq!(uns_path_topic(&HierarchicalPath::default(), "Tag1"), "Tag1");
    }
}
