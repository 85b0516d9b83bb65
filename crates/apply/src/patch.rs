//! Last-applied snapshots and the three-way patch computed from them.

use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Annotation carrying the JSON snapshot of the last desired object we wrote.
pub const LAST_APPLIED_ANNOTATION: &str = "strata.dev/last-applied";

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("last-applied annotation is not valid JSON: {0}")]
    Snapshot(serde_json::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

/// Drop server-populated metadata, our snapshot annotation and status.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        for key in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid", "selfLink"] {
            meta.remove(key);
        }
        let now_empty = match meta.get_mut("annotations").and_then(Json::as_object_mut) {
            Some(annos) => {
                annos.remove(LAST_APPLIED_ANNOTATION);
                annos.is_empty()
            }
            None => false,
        };
        if now_empty {
            meta.remove("annotations");
        }
    }
    // Status is server-populated; ignore it during diffs
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

pub fn snapshot(obj: &DynamicObject) -> Result<String, serde_json::Error> {
    serde_json::to_string(&strip_noisy(serde_json::to_value(obj)?))
}

/// Record `obj`'s own snapshot on it.
pub fn attach_snapshot(obj: &mut DynamicObject) -> Result<(), serde_json::Error> {
    let snap = snapshot(obj)?;
    obj.metadata.annotations.get_or_insert_with(Default::default).insert(LAST_APPLIED_ANNOTATION.to_string(), snap);
    Ok(())
}

/// Parsed snapshot from `obj`, or an empty object when it carries none.
pub fn last_applied(obj: &DynamicObject) -> Result<Json, PatchError> {
    match obj.metadata.annotations.as_ref().and_then(|a| a.get(LAST_APPLIED_ANNOTATION)) {
        Some(raw) => serde_json::from_str(raw).map_err(PatchError::Snapshot),
        None => Ok(Json::Object(Map::new())),
    }
}

/// Merge-style patch taking `current` to `desired`.
///
/// Values set in `desired` are patched only when the live value does not
/// already satisfy them; keys dropped since the last-applied snapshot are
/// patched to null when still live.
pub fn compute_patch(current: &DynamicObject, desired: &DynamicObject) -> Result<Json, PatchError> {
    let original = strip_noisy(last_applied(current)?);
    let modified = strip_noisy(serde_json::to_value(desired)?);
    let live = strip_noisy(serde_json::to_value(current)?);
    Ok(three_way(&original, &modified, &live))
}

pub fn three_way(original: &Json, modified: &Json, live: &Json) -> Json {
    match (modified.as_object(), live.as_object()) {
        (Some(m), Some(l)) => Json::Object(diff_objects(original.as_object(), m, l)),
        _ if satisfies(live, modified) => Json::Object(Map::new()),
        _ => modified.clone(),
    }
}

pub fn is_empty(patch: &Json) -> bool {
    match patch {
        Json::Object(m) => m.is_empty(),
        Json::Null => true,
        _ => false,
    }
}

fn diff_objects(original: Option<&Map<String, Json>>, modified: &Map<String, Json>, live: &Map<String, Json>) -> Map<String, Json> {
    let mut patch = Map::new();
    for (k, want) in modified {
        match (want, live.get(k)) {
            (_, None) => {
                if !want.is_null() {
                    patch.insert(k.clone(), want.clone());
                }
            }
            (Json::Object(w), Some(Json::Object(l))) => {
                let orig = original.and_then(|o| o.get(k)).and_then(Json::as_object);
                let sub = diff_objects(orig, w, l);
                if !sub.is_empty() {
                    patch.insert(k.clone(), Json::Object(sub));
                }
            }
            (_, Some(have)) => {
                // lists are replaced whole, so a key dropped inside an element needs the full list
                let dropped = want.is_array() && original.and_then(|o| o.get(k)).is_some_and(|ov| drops_keys(ov, want));
                if dropped || !satisfies(have, want) {
                    patch.insert(k.clone(), want.clone());
                }
            }
        }
    }
    if let Some(orig) = original {
        for k in orig.keys() {
            if !modified.contains_key(k) && live.contains_key(k) {
                patch.insert(k.clone(), Json::Null);
            }
        }
    }
    patch
}

/// Whether `original` sets an object key that `want` no longer does, pairing
/// list elements by position.
fn drops_keys(original: &Json, want: &Json) -> bool {
    match (original, want) {
        (Json::Object(o), Json::Object(w)) => o.iter().any(|(k, ov)| match w.get(k) {
            Some(wv) => drops_keys(ov, wv),
            None => true,
        }),
        (Json::Array(o), Json::Array(w)) => o.iter().zip(w).any(|(a, b)| drops_keys(a, b)),
        _ => false,
    }
}

/// Whether the live value already holds everything `want` asks for.
/// Server-defaulted extra keys on the live side are fine.
fn satisfies(live: &Json, want: &Json) -> bool {
    match (live, want) {
        (Json::Object(l), Json::Object(w)) => {
            w.iter().all(|(k, wv)| match l.get(k) {
                Some(lv) => satisfies(lv, wv),
                None => wv.is_null(),
            })
        }
        (Json::Array(l), Json::Array(w)) => l.len() == w.len() && l.iter().zip(w).all(|(a, b)| satisfies(a, b)),
        (l, w) => l == w,
    }
}

/// Count what `patch` does to `live`: nulls over live keys are removes,
/// keys live lacks are adds, everything else is an update.
pub fn diff_summary(patch: &Json, live: &Json) -> DiffSummary {
    fn walk(p: &Map<String, Json>, l: Option<&Map<String, Json>>, s: &mut DiffSummary) {
        for (k, pv) in p {
            match (pv, l.and_then(|l| l.get(k))) {
                (Json::Null, Some(_)) => s.removes += 1,
                (Json::Null, None) => {}
                (_, None) => s.adds += 1,
                (Json::Object(po), Some(Json::Object(lo))) => walk(po, Some(lo), s),
                _ => s.updates += 1,
            }
        }
    }
    let mut s = DiffSummary::default();
    if let Some(p) = patch.as_object() {
        walk(p, live.as_object(), &mut s);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_noisy_prunes_common_fields() {
        let v = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "managedFields": [ {"foo": "bar"} ],
                "resourceVersion": "123",
                "generation": 5,
                "uid": "abc",
                "creationTimestamp": "2020-01-01T00:00:00Z",
                "annotations": { LAST_APPLIED_ANNOTATION: "{}" }
            },
            "status": { "obs": true },
            "data": { "k": "v" }
        });
        let pruned = strip_noisy(v);
        let meta = pruned.get("metadata").unwrap().as_object().unwrap();
        assert!(!meta.contains_key("managedFields"));
        assert!(!meta.contains_key("resourceVersion"));
        assert!(!meta.contains_key("generation"));
        assert!(!meta.contains_key("creationTimestamp"));
        assert!(!meta.contains_key("uid"));
        assert!(!meta.contains_key("annotations"));
        assert!(!pruned.as_object().unwrap().contains_key("status"));
    }

    #[test]
    fn diff_summary_counts_adds_updates_removes() {
        let orig = json!({ "data": { "a": "1", "b": "2" }, "spec": { "replicas": 1, "ports": [1] } });
        let want = json!({ "data": { "a": "3", "c": "4" }, "spec": { "replicas": 1, "ports": [1, 2] } });
        let live = json!({ "data": { "a": "1", "b": "2" }, "spec": { "replicas": 1, "ports": [1] } });
        let p = three_way(&orig, &want, &live);
        assert_eq!(diff_summary(&p, &live), DiffSummary { adds: 1, updates: 2, removes: 1 });
        assert_eq!(diff_summary(&json!({}), &live), DiffSummary::default());
    }

    #[test]
    fn live_superset_needs_no_patch() {
        let want = json!({ "spec": { "ports": [ { "name": "thrift", "port": 9083 } ] } });
        let live = json!({ "spec": {
            "clusterIP": "10.0.0.1",
            "ports": [ { "name": "thrift", "port": 9083, "protocol": "TCP" } ]
        } });
        assert!(is_empty(&three_way(&want, &want, &live)));
    }

    #[test]
    fn changed_scalar_and_list_length_are_patched() {
        let orig = json!({ "spec": { "replicas": 1, "args": ["a"] } });
        let want = json!({ "spec": { "replicas": 2, "args": ["a", "b"] } });
        let live = json!({ "spec": { "replicas": 1, "args": ["a"], "paused": false } });
        let p = three_way(&orig, &want, &live);
        assert_eq!(p, json!({ "spec": { "replicas": 2, "args": ["a", "b"] } }));
    }

    #[test]
    fn keys_dropped_since_last_apply_are_deleted() {
        let orig = json!({ "data": { "a": "1", "b": "2" } });
        let want = json!({ "data": { "a": "1" } });
        let live = json!({ "data": { "a": "1", "b": "2" } });
        assert_eq!(three_way(&orig, &want, &live), json!({ "data": { "b": null } }));
        // a key someone else added, never in our snapshot, stays
        let live2 = json!({ "data": { "a": "1", "c": "3" } });
        assert!(is_empty(&three_way(&want, &want, &live2)));
    }

    #[test]
    fn key_dropped_inside_a_list_element_resends_the_list() {
        let orig = json!({ "spec": { "containers": [ { "name": "hms", "resources": { "limits": { "cpu": "2" } } } ] } });
        let want = json!({ "spec": { "containers": [ { "name": "hms" } ] } });
        let live = json!({ "spec": { "containers": [ { "name": "hms", "resources": { "limits": { "cpu": "2" } } } ] } });
        assert_eq!(three_way(&orig, &want, &live), json!({ "spec": { "containers": [ { "name": "hms" } ] } }));
        // a key added to the element is not a drop
        assert!(is_empty(&three_way(&want, &orig, &live)));
    }
}
