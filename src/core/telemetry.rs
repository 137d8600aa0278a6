//! In-process telemetry sink for the voice layer.
//!
//! Entries are kept in a fixed-capacity ring buffer (oldest evicted first) and
//! pushed synchronously to subscribers. Payloads are scrubbed before storage so
//! the buffer never holds deep structures or unbounded strings, and the context
//! is reduced to a small allow-list of identifying keys.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::realtime::ConnectionState;

/// Default number of entries kept in the ring buffer
pub const DEFAULT_CAPACITY: usize = 60;

/// Default maximum length (in chars) of a string payload value
pub const DEFAULT_MAX_STRING_LEN: usize = 256;

/// Event name used for connection state transitions
pub const STATE_TRANSITION_EVENT: &str = "connection.state";

/// Keys kept from the context object
pub const CONTEXT_ALLOW_LIST: &[&str] = &["tenant_id", "user_id", "surface", "route"];

/// Environment variable that turns on tracing mirroring for the global sink
pub const DEBUG_ENV_VAR: &str = "AISHA_TELEMETRY_DEBUG";

const MAX_ARRAY_ITEMS: usize = 5;
const OBJECT_PLACEHOLDER: &str = "[object]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

/// A single recorded telemetry event.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEntry {
    pub id: String,
    pub timestamp: OffsetDateTime,
    pub event: String,
    pub severity: Severity,
    pub payload: Map<String, Value>,
    pub context: Map<String, Value>,
}

/// Sink configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Ring buffer capacity
    pub capacity: usize,
    /// Longest string kept in a payload value
    pub max_string_len: usize,
    /// Mirror every entry as a tracing event
    pub debug: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            debug: false,
        }
    }
}

/// Subscriber callback, invoked with the full buffer snapshot.
pub type TelemetryListener = Arc<dyn Fn(&[TelemetryEntry]) + Send + Sync>;

struct SinkState {
    entries: VecDeque<TelemetryEntry>,
    listeners: Vec<(u64, TelemetryListener)>,
    next_listener_id: u64,
}

pub struct TelemetrySink {
    config: TelemetryConfig,
    state: Mutex<SinkState>,
}

impl std::fmt::Debug for TelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TelemetrySink")
            .field("config", &self.config)
            .field("entries", &state.entries.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl TelemetrySink {
    pub fn new(config: TelemetryConfig) -> Arc<Self> {
        let capacity = config.capacity.max(1);
        Arc::new(Self {
            config: TelemetryConfig {
                capacity,
                ..config
            },
            state: Mutex::new(SinkState {
                entries: VecDeque::with_capacity(capacity),
                listeners: Vec::new(),
                next_listener_id: 0,
            }),
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Record an event.
    ///
    /// `payload` should be a JSON object; any other value is stored under a
    /// `value` key. `context` is reduced to [`CONTEXT_ALLOW_LIST`].
    pub fn record(&self, event: &str, payload: Value, severity: Severity, context: &Value) {
        let entry = TelemetryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: OffsetDateTime::now_utc(),
            event: event.to_string(),
            severity,
            payload: scrub_payload(payload, self.config.max_string_len),
            context: scrub_context(context, self.config.max_string_len),
        };

        if self.config.debug {
            mirror(&entry);
        }

        let (snapshot, listeners) = {
            let mut state = self.state.lock();
            state.entries.push_back(entry);
            while state.entries.len() > self.config.capacity {
                state.entries.pop_front();
            }
            if state.listeners.is_empty() {
                return;
            }
            let snapshot: Vec<TelemetryEntry> = state.entries.iter().cloned().collect();
            let listeners: Vec<TelemetryListener> =
                state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (snapshot, listeners)
        };

        for listener in listeners {
            notify(&listener, &snapshot);
        }
    }

    /// Record a connection state transition under [`STATE_TRANSITION_EVENT`].
    pub fn record_state_transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
        reason: &str,
        context: &Value,
    ) {
        let severity = if to == ConnectionState::Error {
            Severity::Warn
        } else {
            Severity::Info
        };
        self.record(
            STATE_TRANSITION_EVENT,
            serde_json::json!({
                "from": from.as_str(),
                "to": to.as_str(),
                "reason": reason,
            }),
            severity,
            context,
        );
    }

    /// Register a listener. It is called right away with the current snapshot,
    /// then after every record. Dropping the returned [`Subscription`]
    /// unsubscribes.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe(self: &Arc<Self>, listener: TelemetryListener) -> Subscription {
        let (id, snapshot) = {
            let mut state = self.state.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.listeners.push((id, Arc::clone(&listener)));
            (id, state.entries.iter().cloned().collect::<Vec<_>>())
        };
        notify(&listener, &snapshot);
        Subscription {
            sink: Arc::downgrade(self),
            id,
        }
    }

    pub fn snapshot(&self) -> Vec<TelemetryEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Drop every entry and every subscriber.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.listeners.clear();
    }

    fn unsubscribe(&self, id: u64) {
        self.state.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}

/// Handle returned by [`TelemetrySink::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    sink: Weak<TelemetrySink>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.unsubscribe(self.id);
        }
    }
}

/// Process-wide sink, created on first use.
///
/// Mirroring is enabled when `AISHA_TELEMETRY_DEBUG` is set to a truthy value.
pub fn global() -> Arc<TelemetrySink> {
    static GLOBAL: OnceLock<Arc<TelemetrySink>> = OnceLock::new();
    Arc::clone(GLOBAL.get_or_init(|| {
        let debug = std::env::var(DEBUG_ENV_VAR)
            .map(|v| is_truthy(&v))
            .unwrap_or(false);
        TelemetrySink::new(TelemetryConfig {
            debug,
            ..TelemetryConfig::default()
        })
    }))
}

pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn notify(listener: &TelemetryListener, snapshot: &[TelemetryEntry]) {
    if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
        tracing::debug!("Telemetry subscriber panicked; ignoring");
    }
}

fn mirror(entry: &TelemetryEntry) {
    let payload = Value::Object(entry.payload.clone());
    match entry.severity {
        Severity::Error => {
            tracing::error!(target: "aisha_voice::telemetry", event = %entry.event, payload = %payload)
        }
        Severity::Warn => {
            tracing::warn!(target: "aisha_voice::telemetry", event = %entry.event, payload = %payload)
        }
        Severity::Info => {
            tracing::info!(target: "aisha_voice::telemetry", event = %entry.event, payload = %payload)
        }
        Severity::Debug => {
            tracing::debug!(target: "aisha_voice::telemetry", event = %entry.event, payload = %payload)
        }
    }
}

// =============================================================================
// Scrubbing
// =============================================================================

fn truncate(value: &str, max_len: usize) -> String {
    match value.char_indices().nth(max_len) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

fn scrub_primitive(value: Value, max_len: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate(&s, max_len)),
        Value::Array(_) | Value::Object(_) => Value::String(OBJECT_PLACEHOLDER.to_string()),
        other => other,
    }
}

fn scrub_value(value: Value, max_len: usize) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| scrub_primitive(item, max_len))
                .collect(),
        ),
        other => scrub_primitive(other, max_len),
    }
}

/// Reduce a payload to depth-1 primitives.
pub fn scrub_payload(payload: Value, max_len: usize) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (key, scrub_value(value, max_len)))
            .collect(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), scrub_value(other, max_len));
            map
        }
    }
}

/// Keep only allow-listed context keys with primitive values.
pub fn scrub_context(context: &Value, max_len: usize) -> Map<String, Value> {
    let Value::Object(map) = context else {
        return Map::new();
    };
    CONTEXT_ALLOW_LIST
        .iter()
        .filter_map(|key| {
            let value = map.get(*key)?;
            match value {
                Value::Null | Value::Array(_) | Value::Object(_) => None,
                other => Some((key.to_string(), scrub_primitive(other.clone(), max_len))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sink(capacity: usize) -> Arc<TelemetrySink> {
        TelemetrySink::new(TelemetryConfig {
            capacity,
            ..TelemetryConfig::default()
        })
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let sink = sink(60);
        for i in 0..75 {
            sink.record("test.event", json!({ "i": i }), Severity::Info, &Value::Null);
            assert!(sink.len() <= 60);
        }
        let entries = sink.snapshot();
        assert_eq!(entries.len(), 60);
        assert_eq!(entries[0].payload["i"], 15);
        assert_eq!(entries[59].payload["i"], 74);
    }

    #[test]
    fn test_default_capacity() {
        let sink = TelemetrySink::new(TelemetryConfig::default());
        for _ in 0..100 {
            sink.record("e", json!({}), Severity::Debug, &Value::Null);
        }
        assert_eq!(sink.len(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_payload_scrubbing() {
        let long = "x".repeat(1000);
        let scrubbed = scrub_payload(
            json!({
                "text": long,
                "count": 3,
                "flag": true,
                "nested": { "deep": 1 },
                "list": [1, 2, 3, 4, 5, 6, 7],
                "mixed": ["a", { "b": 1 }, [1]],
            }),
            DEFAULT_MAX_STRING_LEN,
        );
        assert_eq!(scrubbed["text"].as_str().unwrap().chars().count(), 256);
        assert_eq!(scrubbed["count"], 3);
        assert_eq!(scrubbed["flag"], true);
        assert_eq!(scrubbed["nested"], "[object]");
        assert_eq!(scrubbed["list"].as_array().unwrap().len(), 5);
        assert_eq!(scrubbed["mixed"], json!(["a", "[object]", "[object]"]));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }

    #[test]
    fn test_non_object_payload_is_wrapped() {
        let scrubbed = scrub_payload(json!("hello"), 10);
        assert_eq!(scrubbed["value"], "hello");
        assert!(scrub_payload(Value::Null, 10).is_empty());
    }

    #[test]
    fn test_context_allow_list() {
        let ctx = scrub_context(
            &json!({
                "tenant_id": "t-1",
                "user_id": "u-1",
                "surface": "realtime",
                "route": "/crm",
                "email": "someone@example.com",
                "nested": { "tenant_id": "x" },
            }),
            DEFAULT_MAX_STRING_LEN,
        );
        assert_eq!(ctx.len(), 4);
        assert!(!ctx.contains_key("email"));
        assert_eq!(ctx["tenant_id"], "t-1");
    }

    #[test]
    fn test_subscribe_receives_snapshot_and_updates() {
        let sink = sink(10);
        sink.record("before", json!({}), Severity::Info, &Value::Null);

        let seen = Arc::new(Mutex::new(Vec::<usize>::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = sink.subscribe(Arc::new(move |entries: &[TelemetryEntry]| {
            seen_clone.lock().push(entries.len());
        }));

        sink.record("after", json!({}), Severity::Info, &Value::Null);
        assert_eq!(*seen.lock(), vec![1, 2]);

        sub.unsubscribe();
        sink.record("ignored", json!({}), Severity::Info, &Value::Null);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_subscriber_is_swallowed() {
        let sink = sink(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let _bad = sink.subscribe(Arc::new(|entries: &[TelemetryEntry]| {
            if !entries.is_empty() {
                panic!("listener failure");
            }
        }));
        let _good = sink.subscribe(Arc::new(move |_: &[TelemetryEntry]| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        sink.record("e", json!({}), Severity::Error, &Value::Null);
        assert_eq!(sink.len(), 1);
        // initial snapshot + one record
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_state_transition_event() {
        let sink = sink(10);
        sink.record_state_transition(
            ConnectionState::Initializing,
            ConnectionState::Error,
            "connect_error",
            &json!({ "surface": "realtime" }),
        );
        let entry = &sink.snapshot()[0];
        assert_eq!(entry.event, STATE_TRANSITION_EVENT);
        assert_eq!(entry.severity, Severity::Warn);
        assert_eq!(entry.payload["from"], "initializing");
        assert_eq!(entry.payload["to"], "error");
        assert_eq!(entry.payload["reason"], "connect_error");
        assert_eq!(entry.context["surface"], "realtime");
    }

    #[test]
    fn test_dispose_drops_entries_and_listeners() {
        let sink = sink(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let _sub = sink.subscribe(Arc::new(move |_: &[TelemetryEntry]| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        sink.record("e", json!({}), Severity::Info, &Value::Null);
        sink.dispose();
        assert!(sink.is_empty());

        sink.record("e", json!({}), Severity::Info, &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_entry_ids_are_unique() {
        let sink = sink(10);
        sink.record("a", json!({}), Severity::Info, &Value::Null);
        sink.record("b", json!({}), Severity::Info, &Value::Null);
        let entries = sink.snapshot();
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" TRUE "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
