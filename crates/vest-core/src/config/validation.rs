//! Config validation - warns about unknown fields

use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

const TOP_LEVEL_KEYS: &[&str] = &[
    "host",
    "port",
    "discoveryIntervalMs",
    "outboundQueueCapacity",
    "maxFrameBytes",
    "mockDevices",
    "effects",
];

const EFFECT_KEYS: &[&str] = &["name", "display_name", "category", "description", "steps"];

const STEP_KEYS: &[&str] = &["cells", "speed", "duration_ms"];

/// Validate JSON config and warn about unknown fields.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    for path in find_unknown_keys(&value) {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Returns paths like "effects[0].steps[1].delay" for unknown fields.
fn find_unknown_keys(value: &Value) -> Vec<String> {
    let mut unknowns = unknown_in(value, TOP_LEVEL_KEYS, "");

    let Some(effects) = value.get("effects").and_then(Value::as_array) else {
        return unknowns;
    };

    for (i, effect) in effects.iter().enumerate() {
        let prefix = format!("effects[{i}]");
        unknowns.extend(unknown_in(effect, EFFECT_KEYS, &prefix));

        let Some(steps) = effect.get("steps").and_then(Value::as_array) else {
            continue;
        };
        for (j, step) in steps.iter().enumerate() {
            unknowns.extend(unknown_in(step, STEP_KEYS, &format!("{prefix}.steps[{j}]")));
        }
    }

    unknowns
}

fn unknown_in(value: &Value, expected: &[&str], prefix: &str) -> Vec<String> {
    let Value::Object(obj) = value else {
        return Vec::new();
    };
    let expected: HashSet<&str> = expected.iter().copied().collect();

    obj.keys()
        .filter(|key| !expected.contains(key.as_str()))
        .map(|key| {
            if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            }
        })
        .collect()
}
