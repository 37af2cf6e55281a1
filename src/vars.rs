//! Process-wide published variables.
//!
//! A small registry of named, read-only values that the web interface serves as one JSON
//! object at `/debug/vars`.
use std::{
    collections::BTreeMap,
    env,
    sync::{Arc, OnceLock, PoisonError, RwLock},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use serde_json::{Map, Value, json};

type Publisher = Arc<dyn Fn() -> Value + Send + Sync>;

static START: OnceLock<(Instant, DateTime<Local>)> = OnceLock::new();
static REGISTRY: OnceLock<RwLock<BTreeMap<String, Publisher>>> = OnceLock::new();

fn registry() -> &'static RwLock<BTreeMap<String, Publisher>> {
    REGISTRY.get_or_init(|| RwLock::new(BTreeMap::new()))
}

fn start() -> &'static (Instant, DateTime<Local>) {
    START.get_or_init(|| (Instant::now(), Local::now()))
}

/// Records the process start time. Later calls keep the first value.
pub fn mark_start() {
    start();
}

/// Wall-clock time the process started.
pub fn started_at() -> DateTime<Local> {
    start().1
}

/// Time elapsed since [`mark_start`].
pub fn uptime() -> Duration {
    start().0.elapsed()
}

/// Publishes `value` under `name`, replacing any earlier publisher of that name.
pub fn publish<F>(name: &str, value: F)
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), Arc::new(value));
}

/// Publishes the variables every mailhub process exposes.
pub fn publish_defaults() {
    mark_start();
    publish("uptime", || json!(uptime().as_secs()));
    let cmdline: Vec<String> = env::args().collect();
    publish("cmdline", move || json!(cmdline));
}

/// Current value of one variable.
pub fn get(name: &str) -> Option<Value> {
    let publisher = registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()?;
    Some(publisher())
}

/// Current value of every variable, keyed by name.
pub fn snapshot() -> Value {
    let publishers: Vec<(String, Publisher)> = registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(name, publisher)| (name.clone(), Arc::clone(publisher)))
        .collect();

    let mut vars = Map::new();
    for (name, publisher) in publishers {
        vars.insert(name, publisher());
    }
    Value::Object(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_uptime_and_cmdline() {
        publish_defaults();
        let vars = snapshot();
        assert!(vars["uptime"].is_u64());
        assert!(vars["cmdline"].is_array());
    }

    #[test]
    fn uptime_counts_whole_seconds() {
        publish_defaults();
        let value = get("uptime").unwrap();
        assert!(value.as_u64().unwrap() <= uptime().as_secs());
    }

    #[test]
    fn publish_replaces_and_reads_lazily() {
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(1));
        let source = Arc::clone(&counter);
        publish("test_counter", move || {
            json!(source.load(std::sync::atomic::Ordering::SeqCst))
        });
        assert_eq!(get("test_counter"), Some(json!(1)));

        counter.store(5, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(get("test_counter"), Some(json!(5)));

        publish("test_counter", || json!("replaced"));
        assert_eq!(snapshot()["test_counter"], json!("replaced"));
        assert_eq!(get("missing_var"), None);
    }
}
