//! Turning collaborator output into action sets.

use relay_core::{ActionSet, AtomicAction, Operation, RelayError, RelayResult};
use serde_json::Value;

/// Parse a model answer shaped as `{"item": {"instruction_set": [...]}}`.
///
/// Markdown fences around the JSON are tolerated. Empty text, a missing
/// `item.instruction_set` key or an empty list are all failures.
pub fn parse_action_set(text: &str) -> RelayResult<ActionSet> {
    let body = strip_fences(text);
    if body.is_empty() {
        return Err(RelayError::Decision("collaborator returned nothing".to_string()));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| RelayError::Decision(format!("unparsable response: {e}")))?;
    let list = value
        .get("item")
        .and_then(|item| item.get("instruction_set"))
        .ok_or_else(|| {
            RelayError::Decision("response is missing 'item.instruction_set'".to_string())
        })?;
    action_list(list)
}

/// Read an item that already holds its actions.
///
/// Accepts a list of actions, a single action object, the
/// `{"item": {"instruction_set": [...]}}` shape, or any of those encoded as a
/// JSON string.
pub fn interpret_item(value: &Value) -> RelayResult<ActionSet> {
    match value {
        Value::String(text) => {
            let inner: Value = serde_json::from_str(strip_fences(text)).map_err(|e| {
                RelayError::Decision(format!("item is not an action list: {e}"))
            })?;
            if inner.is_string() {
                return Err(RelayError::Decision("item is not an action list".to_string()));
            }
            interpret_item(&inner)
        }
        Value::Array(_) => action_list(value),
        Value::Object(map) if map.contains_key("item") => {
            let list = value
                .get("item")
                .and_then(|item| item.get("instruction_set"))
                .ok_or_else(|| {
                    RelayError::Decision("item is missing 'item.instruction_set'".to_string())
                })?;
            action_list(list)
        }
        Value::Object(map) if map.contains_key("operation") => {
            Ok(ActionSet::single(parse_action(value)?))
        }
        _ => Err(RelayError::Decision(format!(
            "item is not an action list: {value}"
        ))),
    }
}

fn action_list(list: &Value) -> RelayResult<ActionSet> {
    let entries = list
        .as_array()
        .ok_or_else(|| RelayError::Decision("instruction_set is not a list".to_string()))?;
    if entries.is_empty() {
        return Err(RelayError::Decision("instruction_set is empty".to_string()));
    }
    entries.iter().map(parse_action).collect::<RelayResult<Vec<_>>>().map(ActionSet::new)
}

/// One entry: `{"operation": .., "action": ..}` or a `[operation, action]` pair.
fn parse_action(entry: &Value) -> RelayResult<AtomicAction> {
    match entry {
        Value::Array(pair) if pair.len() == 2 => {
            let operation: Operation = serde_json::from_value(pair[0].clone())
                .map_err(|e| RelayError::Decision(format!("bad operation {}: {e}", pair[0])))?;
            Ok(AtomicAction::new(operation, pair[1].clone()))
        }
        Value::Object(_) => serde_json::from_value(entry.clone())
            .map_err(|e| RelayError::Decision(format!("bad action {entry}: {e}"))),
        other => Err(RelayError::Decision(format!("bad action {other}"))),
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_item_shape() {
        let text = r#"{"item": {"instruction_set": [
            {"operation": "navigate", "action": "https://example.com"},
            {"operation": "capture", "action": null}
        ]}}"#;
        let set = parse_action_set(text).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.actions()[0].operation, Operation::Navigate);
        assert_eq!(set.actions()[1].operation, Operation::Capture);
    }

    #[test]
    fn test_parse_strips_markdown_fences() {
        let text = "```json\n{\"item\": {\"instruction_set\": [{\"operation\": \"goto\", \"action\": \"https://a\"}]}}\n```";
        let set = parse_action_set(text).unwrap();
        assert_eq!(set.actions()[0].operation, Operation::Navigate);
    }

    #[test]
    fn test_parse_missing_key_fails() {
        let err = parse_action_set(r#"{"steps": []}"#).unwrap_err();
        assert!(matches!(err, RelayError::Decision(_)));
        assert!(err.to_string().contains("instruction_set"));
    }

    #[test]
    fn test_parse_empty_or_garbage_fails() {
        assert!(parse_action_set("").is_err());
        assert!(parse_action_set("   ").is_err());
        assert!(parse_action_set("sure! here you go").is_err());
        assert!(parse_action_set(r#"{"item": {"instruction_set": []}}"#).is_err());
    }

    #[test]
    fn test_parse_pair_entries() {
        let text = r#"{"item": {"instruction_set": [["screenshot", null], ["goto", "https://b"]]}}"#;
        let set = parse_action_set(text).unwrap();
        assert_eq!(set.actions()[0].operation, Operation::Capture);
        assert_eq!(set.actions()[1].action, json!("https://b"));
    }

    #[test]
    fn test_parse_unknown_operation_fails() {
        let text = r##"{"item": {"instruction_set": [{"operation": "click", "action": "#ok"}]}}"##;
        assert!(parse_action_set(text).is_err());
    }

    #[test]
    fn test_interpret_item_shapes() {
        let single = json!({"operation": "navigate", "action": "https://a"});
        assert_eq!(interpret_item(&single).unwrap().len(), 1);

        let list = json!([
            {"operation": "navigate", "action": "https://a"},
            {"operation": "capture", "action": null}
        ]);
        assert_eq!(interpret_item(&list).unwrap().len(), 2);

        let wrapped = json!({"item": {"instruction_set": [{"operation": "capture"}]}});
        assert_eq!(interpret_item(&wrapped).unwrap().len(), 1);

        let encoded = json!("[{\"operation\": \"capture\", \"action\": null}]");
        assert_eq!(interpret_item(&encoded).unwrap().len(), 1);
    }

    #[test]
    fn test_interpret_item_rejects_prose() {
        assert!(interpret_item(&json!("open the docs")).is_err());
        assert!(interpret_item(&json!({"goal": "x"})).is_err());
        assert!(interpret_item(&json!(42)).is_err());
    }
}
