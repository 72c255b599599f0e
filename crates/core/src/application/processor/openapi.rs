// OpenAPI document handling: operation extraction, group filtering, merging

use crate::domain::{ApiType, Operation};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Parse JSON or YAML text into a JSON value
pub fn parse(content: &[u8], format: &str) -> Option<Value> {
    match format {
        "json" => serde_json::from_slice(content).ok(),
        "yaml" => serde_yaml::from_slice::<serde_yaml::Value>(content)
            .ok()
            .map(yaml_to_json),
        _ => None,
    }
}

/// YAML allows non-string keys (`200:` under responses); JSON does not
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;
    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map_or(Value::Null, Value::from)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

pub fn is_openapi(doc: &Value) -> bool {
    doc.get("openapi").is_some() || doc.get("swagger").is_some()
}

pub fn title(doc: &Value) -> Option<String> {
    doc.pointer("/info/title")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Declared operationId, else `<method>-<path>` slugged
pub fn operation_id(method: &str, path: &str, operation: &Value) -> String {
    match operation.get("operationId").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => super::slugify(&format!("{}-{}", method, path)),
    }
}

/// sha-256 of the canonical JSON form (object keys are sorted)
pub fn hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn each_operation<'a>(doc: &'a Value) -> impl Iterator<Item = (&'a str, &'a str, &'a Value)> {
    doc.get("paths")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|paths| paths.iter())
        .filter_map(|(path, item)| item.as_object().map(|item| (path, item)))
        .flat_map(|(path, item)| {
            METHODS.iter().filter_map(move |method| {
                item.get(*method)
                    .map(|op| (*method, path.as_str(), op))
            })
        })
}

pub fn extract_operations(doc: &Value, document_slug: &str) -> Vec<Operation> {
    each_operation(doc)
        .map(|(method, path, op)| Operation {
            operation_id: operation_id(method, path, op),
            api_type: ApiType::Rest,
            document_slug: document_slug.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            title: op
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_string),
            hash: hash_value(op),
        })
        .collect()
}

/// Copy of `doc` whose `paths` hold only operations in `keep`.
/// Returns None when nothing is kept.
pub fn filter_operations(doc: &Value, keep: &HashSet<String>) -> Option<Value> {
    let paths = doc.get("paths")?.as_object()?;
    let mut kept_paths = Map::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        let mut kept_item = Map::new();
        let mut any = false;
        for (key, value) in item {
            if METHODS.contains(&key.as_str()) {
                if keep.contains(&operation_id(key, path, value)) {
                    kept_item.insert(key.clone(), value.clone());
                    any = true;
                }
            } else {
                // Path-level parameters/servers
                kept_item.insert(key.clone(), value.clone());
            }
        }
        if any {
            kept_paths.insert(path.clone(), Value::Object(kept_item));
        }
    }
    if kept_paths.is_empty() {
        return None;
    }
    let mut filtered = doc.clone();
    if let Some(obj) = filtered.as_object_mut() {
        obj.insert("paths".to_string(), Value::Object(kept_paths));
    }
    Some(filtered)
}

/// Merge filtered documents into one specification titled `title`.
/// Later documents do not override paths or components of earlier ones.
pub fn merge(docs: &[Value], title: &str) -> Value {
    let mut merged = Map::new();
    merged.insert(
        "openapi".to_string(),
        docs.iter()
            .find_map(|d| d.get("openapi").cloned())
            .unwrap_or_else(|| Value::String("3.0.0".to_string())),
    );
    let mut info = Map::new();
    info.insert("title".to_string(), Value::String(title.to_string()));
    info.insert(
        "version".to_string(),
        docs.iter()
            .find_map(|d| d.pointer("/info/version").cloned())
            .unwrap_or_else(|| Value::String("1.0.0".to_string())),
    );
    merged.insert("info".to_string(), Value::Object(info));

    let mut paths = Map::new();
    let mut components: Map<String, Value> = Map::new();
    for doc in docs {
        if let Some(p) = doc.get("paths").and_then(Value::as_object) {
            for (path, item) in p {
                match paths.get_mut(path) {
                    Some(Value::Object(existing)) => {
                        if let Some(item) = item.as_object() {
                            for (k, v) in item {
                                existing.entry(k.clone()).or_insert_with(|| v.clone());
                            }
                        }
                    }
                    _ => {
                        paths.insert(path.clone(), item.clone());
                    }
                }
            }
        }
        if let Some(c) = doc.get("components").and_then(Value::as_object) {
            for (section, entries) in c {
                let target = components
                    .entry(section.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let (Some(target), Some(entries)) = (target.as_object_mut(), entries.as_object())
                {
                    for (name, schema) in entries {
                        target.entry(name.clone()).or_insert_with(|| schema.clone());
                    }
                }
            }
        }
    }
    merged.insert("paths".to_string(), Value::Object(paths));
    if !components.is_empty() {
        merged.insert("components".to_string(), Value::Object(components));
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_api() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": {"title": "Users", "version": "1.2.0"},
            "paths": {
                "/users": {
                    "get": {"operationId": "listUsers", "summary": "List users"},
                    "post": {"operationId": "createUser"}
                },
                "/users/{id}": {
                    "parameters": [{"name": "id", "in": "path"}],
                    "delete": {}
                }
            },
            "components": {"schemas": {"User": {"type": "object"}}}
        })
    }

    #[test]
    fn test_extract_operations() {
        let ops = extract_operations(&users_api(), "users");
        let mut ids: Vec<&str> = ops.iter().map(|o| o.operation_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["createUser", "delete-users-id", "listUsers"]);
        let list = ops.iter().find(|o| o.operation_id == "listUsers").unwrap();
        assert_eq!(list.title.as_deref(), Some("List users"));
        assert_eq!(list.method, "get");
    }

    #[test]
    fn test_yaml_parses_like_json() {
        let yaml = b"openapi: 3.0.3\ninfo:\n  title: Users\npaths:\n  /users:\n    get:\n      operationId: listUsers\n      responses:\n        200:\n          description: ok\n";
        let doc = parse(yaml, "yaml").unwrap();
        assert!(doc.pointer("/paths/~1users/get/responses/200").is_some());
        assert!(is_openapi(&doc));
        assert_eq!(title(&doc).as_deref(), Some("Users"));
        assert_eq!(extract_operations(&doc, "users").len(), 1);
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_filter_keeps_path_level_fields() {
        let keep: HashSet<String> = ["delete-users-id".to_string()].into();
        let filtered = filter_operations(&users_api(), &keep).unwrap();
        let paths = filtered["paths"].as_object().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths["/users/{id}"].get("parameters").is_some());

        let none: HashSet<String> = HashSet::new();
        assert!(filter_operations(&users_api(), &none).is_none());
    }

    #[test]
    fn test_merge_unions_paths_and_components() {
        let other = json!({
            "openapi": "3.0.3",
            "paths": {"/orders": {"get": {"operationId": "listOrders"}}},
            "components": {"schemas": {"Order": {"type": "object"}}}
        });
        let merged = merge(&[users_api(), other], "public");
        assert_eq!(merged["info"]["title"], "public");
        assert_eq!(merged["info"]["version"], "1.2.0");
        assert_eq!(merged["paths"].as_object().unwrap().len(), 3);
        assert_eq!(
            merged["components"]["schemas"].as_object().unwrap().len(),
            2
        );
    }
}
