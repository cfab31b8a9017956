// HTML placeholder engine: `__KEY__` tokens are replaced from the normalized
// field map. Unknown tokens are left untouched.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::fields::to_list;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"__([A-Za-z][A-Za-z0-9_]*?)__").expect("placeholder pattern is valid")
    })
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn text_block(text: &str) -> String {
    escape_html(text).replace("\r\n", "\n").replace('\n', "<br>")
}

fn item_text(item: &Value) -> Option<String> {
    let text = match item {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("."))
            .and_then(Value::as_str)?
            .to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

fn list_html(items: &[Value]) -> String {
    let items: String = items
        .iter()
        .filter_map(item_text)
        .map(|text| format!("<li>{}</li>", escape_html(&text)))
        .collect();
    format!("<ul>{items}</ul>")
}

fn entry_html(entry: &Map<String, Value>) -> String {
    let mut parts = Vec::new();
    for (key, value) in entry {
        if key == "bullets_lines" {
            continue;
        }
        match value {
            Value::String(text) if !text.trim().is_empty() => {
                parts.push(format!("<span class=\"{key}\">{}</span>", text_block(text)));
            }
            Value::Array(items) if !items.is_empty() => parts.push(list_html(items)),
            _ => {}
        }
    }
    format!("<div class=\"entry\">{}</div>", parts.concat())
}

fn value_html(key: &str, value: &Value) -> String {
    if key.eq_ignore_ascii_case("SKILLS") {
        return list_html(&to_list(value));
    }
    match value {
        Value::String(text) => text_block(text),
        Value::Array(items) if items.iter().any(Value::is_object) => items
            .iter()
            .filter_map(Value::as_object)
            .map(entry_html)
            .collect(),
        Value::Array(items) => list_html(items),
        Value::Object(map) => entry_html(map),
        Value::Null => String::new(),
        other => escape_html(&other.to_string()),
    }
}

fn field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields
        .get(key)
        .or_else(|| fields.get(&key.to_ascii_uppercase()))
        .or_else(|| fields.get(&key.to_ascii_lowercase()))
}

pub fn apply_placeholders(html: &str, fields: &Map<String, Value>) -> String {
    placeholder_pattern()
        .replace_all(html, |caps: &Captures| match field(fields, &caps[1]) {
            Some(value) => value_html(&caps[1], value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Wraps a document with A4 page rules for browser printing.
pub fn with_print_css(html: &str) -> String {
    const PRINT_CSS: &str =
        "<style>@page { size: A4; margin: 20mm 15mm; } body { -webkit-print-color-adjust: exact; }</style>";
    match html.find("</head>") {
        Some(index) => format!("{}{PRINT_CSS}{}", &html[..index], &html[index..]),
        None => format!("{PRINT_CSS}{html}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_strings_are_escaped_with_line_breaks() {
        let html = apply_placeholders(
            "<p>__SUMMARY__</p>",
            &fields(json!({"SUMMARY": "R&D <lead>\nShips"})),
        );
        assert_eq!(html, "<p>R&amp;D &lt;lead&gt;<br>Ships</p>");
    }

    #[test]
    fn test_skills_accept_string_or_list() {
        let from_string = apply_placeholders("__SKILLS__", &fields(json!({"SKILLS": "Rust, Go"})));
        let from_list = apply_placeholders("__SKILLS__", &fields(json!({"SKILLS": ["Rust", "Go"]})));
        assert_eq!(from_string, "<ul><li>Rust</li><li>Go</li></ul>");
        assert_eq!(from_string, from_list);

        let empty = apply_placeholders("__SKILLS__", &fields(json!({"SKILLS": ""})));
        assert_eq!(empty, "<ul></ul>");
    }

    #[test]
    fn test_object_lists_render_entries() {
        let html = apply_placeholders(
            "__EXPERIENCE__",
            &fields(json!({"EXPERIENCE": [{
                "role": "Dev",
                "company": "",
                "bullets": [{"value": "Shipped", ".": "Shipped"}],
                "bullets_lines": "• Shipped"
            }]})),
        );
        assert!(html.starts_with("<div class=\"entry\">"));
        assert!(html.contains("<span class=\"role\">Dev</span>"));
        assert!(html.contains("<ul><li>Shipped</li></ul>"));
        assert!(!html.contains("company"), "empty fields are skipped");
        assert!(!html.contains("• Shipped"));
    }

    #[test]
    fn test_unknown_and_multiword_tokens() {
        let html = apply_placeholders(
            "__NAME__ / __LANGUAGES_LINES__ / __MISSING__",
            &fields(json!({"NAME": "Ada", "LANGUAGES_LINES": "• English"})),
        );
        assert_eq!(html, "Ada / • English / __MISSING__");
    }

    #[test]
    fn test_print_css_goes_into_head() {
        let html = with_print_css("<html><head><title>x</title></head><body></body></html>");
        assert!(html.contains("@page { size: A4; margin: 20mm 15mm; }"));
        assert!(html.contains("</style></head>"));
        assert!(with_print_css("<p>bare</p>").ends_with("<p>bare</p>"));
    }
}
