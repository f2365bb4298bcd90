//! Variable bag shared by every scope (initial, suite, case, step, item).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Dotted string keys mapped to dynamic values.
///
/// Merges overwrite top-level keys only; nested values are never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars(HashMap<String, Value>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Copy every entry of `other`, overwriting on collision.
    pub fn add_all(&mut self, other: &Vars) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Copy every entry of `other` as `prefix.key`. Unprefixed keys
    /// already present are left alone.
    pub fn add_all_with_prefix(&mut self, prefix: &str, other: &Vars) {
        for (k, v) in &other.0 {
            self.0.insert(format!("{prefix}.{k}"), v.clone());
        }
    }

    /// Insert `value` under `prefix` and, for objects and arrays, every
    /// nested leaf under its dotted path (`prefix.field`, `prefix.0`).
    pub fn add_flattened(&mut self, prefix: &str, value: &Value) {
        self.0.insert(prefix.to_string(), value.clone());
        match value {
            Value::Object(map) => {
                for (key, val) in map {
                    self.add_flattened(&format!("{prefix}.{key}"), val);
                }
            }
            Value::Array(array) => {
                for (idx, val) in array.iter().enumerate() {
                    self.add_flattened(&format!("{prefix}.{idx}"), val);
                }
            }
            _ => {}
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Keys in sorted order, for stable diagnostics.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Flat string view used by the template resolver.
    ///
    /// Every key is stringified; objects and arrays additionally expose
    /// their children under dotted keys. Explicit keys take precedence over
    /// derived ones.
    pub fn dump(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (k, v) in &self.0 {
            out.insert(k.clone(), stringify(v));
        }
        for (k, v) in &self.0 {
            dump_children(k, v, &mut out);
        }
        out
    }

    /// Fold dotted keys into nested objects, for expression evaluation.
    ///
    /// Shallower keys are placed first; a deeper key whose slot is already
    /// taken, or whose parent is not an object, is dropped.
    pub fn to_nested(&self) -> Map<String, Value> {
        let mut entries: Vec<(&String, &Value)> = self.0.iter().collect();
        entries.sort_by(|(a, _), (b, _)| {
            a.matches('.').count().cmp(&b.matches('.').count()).then(a.cmp(b))
        });

        let mut root = Map::new();
        for (key, value) in entries {
            insert_nested(&mut root, key, value);
        }
        root
    }
}

impl From<HashMap<String, Value>> for Vars {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Vars {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// String form of a value: strings verbatim, everything else as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn dump_children(
    prefix: &str,
    value: &Value,
    out: &mut BTreeMap<String, String>,
) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let path = format!("{prefix}.{key}");
                out.entry(path.clone()).or_insert_with(|| stringify(val));
                dump_children(&path, val, out);
            }
        }
        Value::Array(array) => {
            for (idx, val) in array.iter().enumerate() {
                let path = format!("{prefix}.{idx}");
                out.entry(path.clone()).or_insert_with(|| stringify(val));
                dump_children(&path, val, out);
            }
        }
        _ => {}
    }
}

fn insert_nested(root: &mut Map<String, Value>, key: &str, value: &Value) {
    let parts: Vec<&str> = key.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };

    let mut current = root;
    for part in parents {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match slot {
            Value::Object(map) => current = map,
            _ => return,
        }
    }

    if !current.contains_key(*last) {
        current.insert(last.to_string(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_all_last_writer_wins() {
        let mut a = Vars::new();
        a.add("x", 1);
        a.add("y", "keep");
        let mut b = Vars::new();
        b.add("x", 2);

        a.add_all(&b);
        assert_eq!(a.get("x"), Some(&json!(2)));
        assert_eq!(a.get("y"), Some(&json!("keep")));
    }

    #[test]
    fn test_add_all_does_not_deep_merge() {
        let mut a = Vars::new();
        a.add("obj", json!({"a": 1, "b": 2}));
        let mut b = Vars::new();
        b.add("obj", json!({"a": 3}));

        a.add_all(&b);
        assert_eq!(a.get("obj"), Some(&json!({"a": 3})));
    }

    #[test]
    fn test_add_all_with_prefix_keeps_unprefixed() {
        let mut a = Vars::new();
        a.add("token", "suite");
        let mut b = Vars::new();
        b.add("token", "case");

        a.add_all_with_prefix("login", &b);
        assert_eq!(a.get("token"), Some(&json!("suite")));
        assert_eq!(a.get("login.token"), Some(&json!("case")));
    }

    #[test]
    fn test_dump_flattens_composites() {
        let mut v = Vars::new();
        v.add("n", 3);
        v.add("list", json!(["a", "b"]));
        v.add("obj", json!({"inner": {"k": true}}));

        let dump = v.dump();
        assert_eq!(dump["n"], "3");
        assert_eq!(dump["list"], r#"["a","b"]"#);
        assert_eq!(dump["list.1"], "b");
        assert_eq!(dump["obj.inner.k"], "true");
    }

    #[test]
    fn test_dump_explicit_key_wins_over_derived() {
        let mut v = Vars::new();
        v.add("obj", json!({"k": "derived"}));
        v.add("obj.k", "explicit");

        assert_eq!(v.dump()["obj.k"], "explicit");
    }

    #[test]
    fn test_to_nested() {
        let mut v = Vars::new();
        v.add("tauon.testcase", "login");
        v.add("tauon.teststep.number", 2);
        v.add("result", json!({"code": 0}));
        v.add("result.code", 0);

        let nested = Value::Object(v.to_nested());
        assert_eq!(nested["tauon"]["teststep"]["number"], json!(2));
        assert_eq!(nested["result"], json!({"code": 0}));
    }

    #[test]
    fn test_to_nested_scalar_parent_drops_child() {
        let mut v = Vars::new();
        v.add("a", 1);
        v.add("a.b", 2);

        let nested = v.to_nested();
        assert_eq!(nested["a"], json!(1));
    }

    #[test]
    fn test_add_flattened() {
        let mut v = Vars::new();
        v.add_flattened("result", &json!({"items": [{"id": 7}]}));

        assert_eq!(v.get("result.items.0.id"), Some(&json!(7)));
        assert_eq!(v.get("result.items"), Some(&json!([{"id": 7}])));
    }
}
