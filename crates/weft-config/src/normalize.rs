//! Payload normalization.
//!
//! External submissions arrive in one of two JSON shapes:
//!
//! - `{ "workflow": { "name", "id"?, "nodes": [..], "edges": [..] } }`
//! - the canvas shape: `{ "nodes": [..], "edges": [..], "workflowName"?, "id"? }`
//!
//! [`normalize_payload`] canonicalizes both into the first shape and cleans
//! up the loose conventions canvas editors produce: node types stashed under
//! `data.nodeType`, comma-separated strings where lists are expected, and
//! `isControl` flags encoded as strings or edge types. The function is
//! idempotent; a payload matching neither shape is returned unchanged.

use serde_json::{Map, Value};

/// Canonicalize an externally-authored workflow payload.
pub fn normalize_payload(payload: Value) -> Value {
  let Value::Object(mut envelope) = payload else {
    return payload;
  };

  if let Some(Value::Object(workflow)) = envelope.remove("workflow") {
    let normalized = normalize_workflow(workflow);
    envelope.insert("workflow".to_string(), Value::Object(normalized));
    return Value::Object(envelope);
  }

  // Canvas shape: nodes/edges at the top level.
  if matches!(envelope.get("nodes"), Some(Value::Array(_))) {
    let mut workflow = Map::new();

    let name = envelope
      .remove("workflowName")
      .or_else(|| envelope.remove("name"))
      .unwrap_or_else(|| Value::String("Untitled Workflow".to_string()));
    workflow.insert("name".to_string(), name);

    if let Some(id) = envelope.remove("id") {
      workflow.insert("id".to_string(), id);
    }
    if let Some(nodes) = envelope.remove("nodes") {
      workflow.insert("nodes".to_string(), nodes);
    }
    workflow.insert(
      "edges".to_string(),
      envelope.remove("edges").unwrap_or_else(|| Value::Array(vec![])),
    );

    let normalized = normalize_workflow(workflow);
    envelope.insert("workflow".to_string(), Value::Object(normalized));
    return Value::Object(envelope);
  }

  // Neither shape detected: hand the payload back untouched.
  Value::Object(envelope)
}

/// The workflow object inside a normalized payload, if present.
pub fn workflow_object(normalized: &Value) -> Option<&Value> {
  normalized.get("workflow").filter(|v| v.is_object())
}

fn normalize_workflow(mut workflow: Map<String, Value>) -> Map<String, Value> {
  if let Some(Value::Array(nodes)) = workflow.get_mut("nodes") {
    for node in nodes.iter_mut() {
      if let Value::Object(node) = node {
        normalize_node(node);
      }
    }
  }

  if let Some(Value::Array(edges)) = workflow.get_mut("edges") {
    for edge in edges.iter_mut() {
      if let Value::Object(edge) = edge {
        normalize_edge(edge);
      }
    }
  }

  workflow
}

fn normalize_node(node: &mut Map<String, Value>) {
  // Canvas editors put the node type under data.nodeType.
  let type_missing = match node.get("type") {
    None | Some(Value::Null) => true,
    Some(Value::String(s)) => s.is_empty(),
    Some(_) => false,
  };
  if type_missing {
    if let Some(node_type) = node
      .get("data")
      .and_then(|d| d.get("nodeType"))
      .and_then(Value::as_str)
    {
      let node_type = node_type.to_string();
      node.insert("type".to_string(), Value::String(node_type));
    }
  }

  if let Some(Value::Object(config)) = node.get_mut("config") {
    let keys: Vec<String> = config
      .iter()
      .filter(|(k, v)| is_list_key(k) && v.is_string())
      .map(|(k, _)| k.clone())
      .collect();
    for key in keys {
      if let Some(Value::String(raw)) = config.get(&key) {
        let items: Vec<Value> = raw
          .split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(|s| Value::String(s.to_string()))
          .collect();
        config.insert(key, Value::Array(items));
      }
    }
  }
}

/// Config keys whose values are lists, even when authored as a single
/// comma-separated string.
fn is_list_key(key: &str) -> bool {
  key == "array" || key.ends_with("Fields") || key.ends_with("Keys") || key.ends_with("Params")
}

fn normalize_edge(edge: &mut Map<String, Value>) {
  let is_control = match edge.get("isControl") {
    Some(Value::Bool(b)) => *b,
    Some(Value::String(s)) => s == "true",
    _ => false,
  } || edge.get("type").and_then(Value::as_str) == Some("control");

  edge.insert("isControl".to_string(), Value::Bool(is_control));
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn wraps_canvas_shape_into_workflow_envelope() {
    let payload = json!({
      "workflowName": "etl",
      "id": "wf-1",
      "nodes": [{"id": "a", "type": "Start"}],
      "edges": []
    });

    let normalized = normalize_payload(payload);

    let workflow = workflow_object(&normalized).unwrap();
    assert_eq!(workflow["name"], "etl");
    assert_eq!(workflow["id"], "wf-1");
    assert_eq!(workflow["nodes"][0]["id"], "a");
  }

  #[test]
  fn copies_node_type_from_canvas_data() {
    let payload = json!({
      "nodes": [
        {"id": "a", "data": {"nodeType": "FileSource"}},
        {"id": "b", "type": "", "data": {"nodeType": "Filter"}}
      ],
      "edges": []
    });

    let normalized = normalize_payload(payload);

    let nodes = &workflow_object(&normalized).unwrap()["nodes"];
    assert_eq!(nodes[0]["type"], "FileSource");
    assert_eq!(nodes[1]["type"], "Filter");
  }

  #[test]
  fn splits_comma_separated_list_config_values() {
    let payload = json!({
      "workflow": {
        "name": "w",
        "nodes": [{
          "id": "a",
          "type": "Join",
          "config": {
            "joinKeys": "id, name ,email",
            "selectedFields": "x,y",
            "array": "1,2",
            "path": "a,b"
          }
        }],
        "edges": []
      }
    });

    let normalized = normalize_payload(payload);

    let config = &workflow_object(&normalized).unwrap()["nodes"][0]["config"];
    assert_eq!(config["joinKeys"], json!(["id", "name", "email"]));
    assert_eq!(config["selectedFields"], json!(["x", "y"]));
    assert_eq!(config["array"], json!(["1", "2"]));
    // Keys outside the list-key convention are untouched.
    assert_eq!(config["path"], "a,b");
  }

  #[test]
  fn normalizes_is_control_variants() {
    let payload = json!({
      "workflow": {
        "name": "w",
        "nodes": [],
        "edges": [
          {"source": "a", "target": "b", "isControl": true},
          {"source": "a", "target": "c", "isControl": "true"},
          {"source": "a", "target": "d", "type": "control"},
          {"source": "a", "target": "e"}
        ]
      }
    });

    let normalized = normalize_payload(payload);

    let edges = &workflow_object(&normalized).unwrap()["edges"];
    assert_eq!(edges[0]["isControl"], true);
    assert_eq!(edges[1]["isControl"], true);
    assert_eq!(edges[2]["isControl"], true);
    assert_eq!(edges[3]["isControl"], false);
  }

  #[test]
  fn is_idempotent() {
    let payload = json!({
      "nodes": [{
        "id": "a",
        "data": {"nodeType": "Switch"},
        "config": {"routeKeys": "out1,out2"}
      }],
      "edges": [{"source": "a", "target": "b", "isControl": "true"}],
      "workflowName": "w"
    });

    let once = normalize_payload(payload);
    let twice = normalize_payload(once.clone());
    assert_eq!(once, twice);
  }

  #[test]
  fn returns_unrecognized_payloads_unchanged() {
    let payload = json!({"foo": "bar"});
    assert_eq!(normalize_payload(payload.clone()), payload);

    let payload = json!([1, 2, 3]);
    assert_eq!(normalize_payload(payload.clone()), payload);
  }
}
