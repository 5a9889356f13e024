//! Structural diffing of resource state
//!
//! [`ObjectDiff`] walks two JSON documents and records every leaf that was
//! added, removed or changed, keyed by a JSON pointer. A `null` value is
//! treated the same as an absent one. [`ResourceDiff`] pairs the desired and
//! current resolved state of a resource with that comparison.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// How a single path differs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaState {
    /// Present in the working document only
    Added,
    /// Present in the base document only
    Removed,
    /// Present in both with different values
    Changed,
}

/// One difference between two documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// JSON pointer to the differing value (`/` for the root)
    pub path: String,
    pub state: DeltaState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
}

/// Deep comparison of two JSON documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDiff {
    deltas: Vec<Delta>,
}

impl ObjectDiff {
    /// Compare a working document (the desired one) against a base document
    pub fn compare(working: &Value, base: &Value) -> Self {
        let mut deltas = Vec::new();
        walk(String::new(), present(working), present(base), &mut deltas);
        Self { deltas }
    }

    pub fn has_changes(&self) -> bool {
        !self.deltas.is_empty()
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Structured rendering, an object keyed by JSON pointer
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for delta in &self.deltas {
            let mut entry = Map::new();
            entry.insert("state".into(), serde_json::json!(delta.state));
            if let Some(desired) = &delta.desired {
                entry.insert("desired".into(), desired.clone());
            }
            if let Some(current) = &delta.current {
                entry.insert("current".into(), current.clone());
            }
            out.insert(delta.path.clone(), Value::Object(entry));
        }
        Value::Object(out)
    }

    /// Human readable rendering, one line per delta
    pub fn to_debug(&self) -> String {
        self.deltas
            .iter()
            .map(|delta| match delta.state {
                DeltaState::Added => format!("{} added: {}", delta.path, render(&delta.desired)),
                DeltaState::Removed => format!("{} removed: {}", delta.path, render(&delta.current)),
                DeltaState::Changed => format!(
                    "{} changed: {} -> {}",
                    delta.path,
                    render(&delta.current),
                    render(&delta.desired)
                ),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Top-level properties touched by this diff
    pub fn affected_root_properties(&self) -> BTreeSet<String> {
        self.deltas
            .iter()
            .filter_map(|delta| {
                delta
                    .path
                    .trim_start_matches('/')
                    .split('/')
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .map(unescape)
            })
            .collect()
    }
}

fn present(value: &Value) -> Option<&Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

fn walk(path: String, working: Option<&Value>, base: Option<&Value>, out: &mut Vec<Delta>) {
    match (working, base) {
        (None, None) => {}
        (Some(Value::Object(w)), Some(Value::Object(b))) => {
            let keys: BTreeSet<&String> = w.keys().chain(b.keys()).collect();
            for key in keys {
                walk(
                    format!("{}/{}", path, escape(key)),
                    w.get(key).and_then(present),
                    b.get(key).and_then(present),
                    out,
                );
            }
        }
        (Some(Value::Array(w)), Some(Value::Array(b))) => {
            for index in 0..w.len().max(b.len()) {
                walk(
                    format!("{}/{}", path, index),
                    w.get(index).and_then(present),
                    b.get(index).and_then(present),
                    out,
                );
            }
        }
        (Some(w), Some(b)) => {
            if w != b {
                out.push(delta(path, DeltaState::Changed, Some(w), Some(b)));
            }
        }
        (Some(w), None) => out.push(delta(path, DeltaState::Added, Some(w), None)),
        (None, Some(b)) => out.push(delta(path, DeltaState::Removed, None, Some(b))),
    }
}

fn delta(path: String, state: DeltaState, desired: Option<&Value>, current: Option<&Value>) -> Delta {
    Delta {
        path: if path.is_empty() { "/".to_string() } else { path },
        state,
        desired: desired.cloned(),
        current: current.cloned(),
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn render(value: &Option<Value>) -> String {
    value.as_ref().map(Value::to_string).unwrap_or_default()
}

/// Desired vs current resolved state of one resource
#[derive(Debug, Clone)]
pub struct ResourceDiff<R> {
    desired: R,
    current: Option<R>,
    diff: ObjectDiff,
}

impl<R: Serialize> ResourceDiff<R> {
    /// Compute the diff. Fails only if either side cannot be serialized.
    pub fn new(desired: R, current: Option<R>) -> Result<Self, serde_json::Error> {
        let working = serde_json::to_value(&desired)?;
        let base = match &current {
            Some(current) => serde_json::to_value(current)?,
            None => Value::Null,
        };
        let diff = ObjectDiff::compare(&working, &base);
        Ok(Self {
            desired,
            current,
            diff,
        })
    }

    pub fn desired(&self) -> &R {
        &self.desired
    }

    pub fn current(&self) -> Option<&R> {
        self.current.as_ref()
    }

    /// A missing current state always counts as a change
    pub fn has_changes(&self) -> bool {
        self.current.is_none() || self.diff.has_changes()
    }

    pub fn object_diff(&self) -> &ObjectDiff {
        &self.diff
    }

    pub fn to_delta_json(&self) -> Value {
        self.diff.to_json()
    }

    pub fn to_debug(&self) -> String {
        self.diff.to_debug()
    }

    /// Stable hash of the structured delta
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.to_delta_json().to_string().as_bytes())
            .to_hex()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_documents_have_no_changes() {
        let doc = json!({ "image": "fnord:1.0", "ports": [80, 443], "tags": { "a": "b" } });
        assert!(!ObjectDiff::compare(&doc, &doc.clone()).has_changes());
    }

    #[test]
    fn test_nested_changes_are_reported_by_path() {
        let working = json!({ "capacity": { "min": 1, "max": 5 }, "image": "fnord:2.0" });
        let base = json!({ "capacity": { "min": 1, "max": 3 }, "image": "fnord:2.0", "legacy": true });

        let diff = ObjectDiff::compare(&working, &base);
        let paths: Vec<_> = diff.deltas().iter().map(|d| (d.path.as_str(), d.state)).collect();
        assert_eq!(
            paths,
            vec![
                ("/capacity/max", DeltaState::Changed),
                ("/legacy", DeltaState::Removed),
            ]
        );

        let rendered = diff.to_json();
        assert_eq!(rendered["/capacity/max"]["desired"], json!(5));
        assert_eq!(rendered["/capacity/max"]["current"], json!(3));
        assert_eq!(rendered["/legacy"]["state"], json!("REMOVED"));

        let roots = diff.affected_root_properties();
        assert!(roots.contains("capacity"));
        assert!(roots.contains("legacy"));
    }

    #[test]
    fn test_null_is_treated_as_absent() {
        let working = json!({ "image": "fnord:1.0", "owner": null });
        let base = json!({ "image": "fnord:1.0" });
        assert!(!ObjectDiff::compare(&working, &base).has_changes());
    }

    #[test]
    fn test_keys_with_slashes_are_escaped() {
        let working = json!({ "a/b": 1 });
        let base = json!({ "a/b": 2 });
        let diff = ObjectDiff::compare(&working, &base);
        assert_eq!(diff.deltas()[0].path, "/a~1b");
        assert!(diff.affected_root_properties().contains("a/b"));
    }

    #[test]
    fn test_missing_current_counts_as_change() {
        let diff = ResourceDiff::new(json!({}), None).unwrap();
        assert!(diff.has_changes());
        assert!(diff.current().is_none());
    }

    #[test]
    fn test_fingerprint_tracks_delta() {
        let a = ResourceDiff::new(json!({ "n": 2 }), Some(json!({ "n": 1 }))).unwrap();
        let b = ResourceDiff::new(json!({ "n": 2 }), Some(json!({ "n": 1 }))).unwrap();
        let c = ResourceDiff::new(json!({ "n": 3 }), Some(json!({ "n": 1 }))).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(a.to_debug().contains("/n changed: 1 -> 2"));
    }
}
