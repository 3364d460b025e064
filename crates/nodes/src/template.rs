//! `{{ path }}` placeholder rendering over JSON values.
//!
//! A string that consists of a single placeholder is replaced by the value
//! it points at (keeping its JSON type); placeholders embedded in longer
//! strings are substituted textually. Unknown paths render as `null` / "".

use serde_json::Value;

/// Resolve a dotted path (`nodes.fetch.body.items.0.id`) against `root`.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render every placeholder inside `template` against `scope`.
pub fn render(template: &Value, scope: &Value) -> Value {
    match template {
        Value::String(s) => render_str(s, scope),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_str(s: &str, scope: &Value) -> Value {
    if let Some(path) = whole_placeholder(s) {
        return lookup(scope, path).cloned().unwrap_or(Value::Null);
    }
    if !s.contains("{{") {
        return Value::String(s.to_owned());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                if let Some(value) = lookup(scope, &after[..end]) {
                    out.push_str(&stringify(value));
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    (!inner.contains("{{") && !inner.contains("}}")).then_some(inner)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "input": { "user": { "id": 7, "name": "ada" } },
            "nodes": { "fetch": { "items": [ { "sku": "A1" } ] } }
        })
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let scope = scope();
        assert_eq!(lookup(&scope, "nodes.fetch.items.0.sku"), Some(&json!("A1")));
        assert_eq!(lookup(&scope, "nodes.fetch.items.9"), None);
        assert_eq!(lookup(&scope, ""), Some(&scope));
    }

    #[test]
    fn whole_placeholder_keeps_json_type() {
        let out = render(&json!({ "id": "{{ input.user.id }}" }), &scope());
        assert_eq!(out, json!({ "id": 7 }));
    }

    #[test]
    fn embedded_placeholders_are_substituted() {
        let out = render(
            &json!("hello {{input.user.name}} ({{input.user.id}}){{missing}}"),
            &scope(),
        );
        assert_eq!(out, json!("hello ada (7)"));
    }

    #[test]
    fn unterminated_placeholder_is_left_verbatim() {
        assert_eq!(render(&json!("a {{ b"), &scope()), json!("a {{ b"));
    }
}
