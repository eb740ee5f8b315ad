//! Kind-specific merge rules and the semantic containment check
//!
//! Patch-kind children are never blindly overwritten. Fields other actors own
//! (replica counts set by autoscalers, immutable Job fields filled in by the
//! API server) are folded from the live object into the desired one first,
//! then the write is skipped entirely when the live object already contains
//! everything desired.

use kube::api::DynamicObject;
use serde_json::{Map, Value};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// Annotation written by `kubectl rollout restart`
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

fn spec_mut(object: &mut DynamicObject) -> Option<&mut Map<String, Value>> {
    if !object.data.is_object() {
        object.data = Value::Object(Map::new());
    }
    let data = object.data.as_object_mut()?;
    data.entry("spec")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

/// Keep the live replica count when the desired Deployment does not pin one
///
/// A live count of zero is raised to one. The rollout restart annotation is
/// dropped from the live copy so it never counts as drift.
pub fn merge_deployment(desired: &mut DynamicObject, live: &mut DynamicObject) {
    if let Some(annotations) = live
        .data
        .pointer_mut("/spec/template/metadata/annotations")
        .and_then(Value::as_object_mut)
    {
        annotations.remove(RESTARTED_AT_ANNOTATION);
    }

    let pinned = desired
        .data
        .pointer("/spec/replicas")
        .is_some_and(|v| !v.is_null());
    if pinned {
        return;
    }

    let live_count = live.data.pointer("/spec/replicas").and_then(Value::as_i64);
    if let Some(count) = live_count {
        let count = if count == 0 { 1 } else { count };
        if let Some(spec) = spec_mut(desired) {
            spec.insert("replicas".to_string(), Value::from(count));
        }
    }
}

/// Carry immutable Job fields forward from the live object
///
/// `spec.selector`, `spec.template` and `spec.completions` cannot change after
/// creation. Live labels survive underneath the desired ones.
pub fn merge_job(desired: &mut DynamicObject, live: &mut DynamicObject) {
    for field in ["selector", "template", "completions"] {
        let live_value = live
            .data
            .pointer(&format!("/spec/{field}"))
            .filter(|v| !v.is_null())
            .cloned();
        if let (Some(value), Some(spec)) = (live_value, spec_mut(desired)) {
            spec.insert(field.to_string(), value);
        }
    }

    let mut labels = live.metadata.labels.clone().unwrap_or_default();
    labels.extend(desired.metadata.labels.take().unwrap_or_default());
    desired.metadata.labels = Some(labels);
}

/// Whether a desired value counts as unset
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Every field set in `desired` has an equal value in `live`
pub fn contains(desired: &Value, live: &Value) -> bool {
    if is_unset(desired) {
        return true;
    }
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d
            .iter()
            .all(|(k, v)| contains(v, l.get(k).unwrap_or(&Value::Null))),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| contains(dv, lv))
        }
        (Value::Number(d), Value::Number(l)) => d.as_f64() == l.as_f64(),
        (d, l) => d == l,
    }
}

/// Whether the live object already reflects everything the desired one sets
pub fn is_derivative(desired: &DynamicObject, live: &DynamicObject) -> bool {
    let labels_match = desired
        .metadata
        .labels
        .iter()
        .flatten()
        .all(|(k, v)| live.metadata.labels.as_ref().and_then(|l| l.get(k)) == Some(v));
    let annotations_match = desired
        .metadata
        .annotations
        .iter()
        .flatten()
        .all(|(k, v)| live.metadata.annotations.as_ref().and_then(|a| a.get(k)) == Some(v));
    let owners_match = desired.metadata.owner_references.iter().flatten().all(|d| {
        live.metadata
            .owner_references
            .iter()
            .flatten()
            .any(|l| l.uid == d.uid)
    });

    labels_match && annotations_match && owners_match && contains(&content(desired), &live.data)
}

/// Non-metadata, non-status content of an object
pub fn content(object: &DynamicObject) -> Value {
    let mut data = object.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
        map.remove("metadata");
        map.remove("apiVersion");
        map.remove("kind");
    }
    data
}

/// Union of two owner reference lists, keyed by UID, `existing` first
pub fn union_owner_references(
    existing: Option<&Vec<OwnerReference>>,
    desired: Option<&Vec<OwnerReference>>,
) -> Option<Vec<OwnerReference>> {
    let mut refs: Vec<OwnerReference> = existing.cloned().unwrap_or_default();
    for owner in desired.into_iter().flatten() {
        if !refs.iter().any(|r| r.uid == owner.uid) {
            refs.push(owner.clone());
        }
    }
    (!refs.is_empty()).then_some(refs)
}

/// JSON merge patch carrying labels, annotations, owner references and content
pub fn build_patch(desired: &DynamicObject) -> Value {
    let mut patch = match content(desired) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let mut metadata = Map::new();
    if let Some(labels) = &desired.metadata.labels {
        metadata.insert("labels".to_string(), serde_json::json!(labels));
    }
    if let Some(annotations) = &desired.metadata.annotations {
        metadata.insert("annotations".to_string(), serde_json::json!(annotations));
    }
    if let Some(refs) = &desired.metadata.owner_references {
        metadata.insert("ownerReferences".to_string(), serde_json::json!(refs));
    }
    if !metadata.is_empty() {
        patch.insert("metadata".to_string(), Value::Object(metadata));
    }

    Value::Object(patch)
}

/// Apply an RFC 7386 JSON merge patch in place
pub fn json_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                json_merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
