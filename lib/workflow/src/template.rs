//! `${name}` variable substitution in node parameters.
//!
//! Substitution walks strings nested anywhere in arrays and objects. A token
//! is replaced by the variable's string form: strings verbatim, anything
//! else as compact JSON. Tokens naming unknown variables stay as written.

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

/// A flat map of variable names to values.
pub type Variables = serde_json::Map<String, JsonValue>;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("token pattern is valid"));

/// Resolves every token in `value`, returning a new value.
#[must_use]
pub fn resolve_value(value: &JsonValue, variables: &Variables) -> JsonValue {
    match value {
        JsonValue::String(text) => JsonValue::String(resolve_str(text, variables)),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| resolve_value(item, variables))
                .collect(),
        ),
        JsonValue::Object(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), resolve_value(item, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolves every token in a single string.
#[must_use]
pub fn resolve_str(text: &str, variables: &Variables) -> String {
    TOKEN
        .replace_all(text, |caps: &Captures<'_>| {
            match lookup_path(variables, caps[1].trim()) {
                Some(value) => string_form(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Looks up `name` in `variables`.
///
/// An exact key wins. Otherwise `a.b.0` walks into object fields and array
/// indices.
#[must_use]
pub fn lookup_path<'a>(variables: &'a Variables, name: &str) -> Option<&'a JsonValue> {
    if let Some(value) = variables.get(name) {
        return Some(value);
    }

    let mut segments = name.split('.');
    let mut current = variables.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            JsonValue::Object(fields) => fields.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Returns the text a value substitutes as.
#[must_use]
pub fn string_form(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: JsonValue) -> Variables {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("variables must be an object"),
        }
    }

    #[test]
    fn known_tokens_resolve_and_unknown_stay() {
        let variables = vars(json!({ "x": 5 }));
        assert_eq!(resolve_str("${x}", &variables), "5");
        assert_eq!(resolve_str("${y}", &variables), "${y}");
        assert_eq!(resolve_str("page-${x}-of-${y}", &variables), "page-5-of-${y}");
    }

    #[test]
    fn resolves_through_nested_values() {
        let variables = vars(json!({ "base": "https://example.test", "page": 2 }));
        let params = json!({
            "url": "${base}/list?page=${page}",
            "steps": ["${base}", { "wait": "${page}" }],
            "retries": 3
        });

        assert_eq!(
            resolve_value(&params, &variables),
            json!({
                "url": "https://example.test/list?page=2",
                "steps": ["https://example.test", { "wait": "2" }],
                "retries": 3
            })
        );
    }

    #[test]
    fn non_string_values_use_compact_json() {
        let variables = vars(json!({ "tags": ["a", "b"], "flag": true, "none": null }));
        assert_eq!(resolve_str("${tags}", &variables), r#"["a","b"]"#);
        assert_eq!(resolve_str("${flag}/${none}", &variables), "true/null");
    }

    #[test]
    fn dotted_paths_walk_objects_and_arrays() {
        let variables = vars(json!({
            "user": { "name": "ada", "roles": ["admin"] },
            "a.b": "literal"
        }));
        assert_eq!(resolve_str("${user.name}", &variables), "ada");
        assert_eq!(resolve_str("${user.roles.0}", &variables), "admin");
        assert_eq!(resolve_str("${a.b}", &variables), "literal");
        assert_eq!(resolve_str("${user.email}", &variables), "${user.email}");
    }
}
