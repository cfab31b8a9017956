//! Field normalization: turns the model's loosely-shaped field map into the
//! canonical data both template engines consume.
//!
//! Rules:
//! - scalars become strings, `null` becomes `""`
//! - empty strings, empty arrays and all-empty objects are dropped from arrays
//! - `bullets`/`highlights` become `{ "value": t, ".": t }` items
//! - `EXPERIENCE` / `EDUCATION` entries are canonicalised through alias lookup
//! - derived line fields are backfilled only when the caller left them empty

use serde::Serialize;
use serde_json::{Map, Value};

pub const BULLET_CHAR: char = '•';

const LANGUAGE_KEYS: [&str; 5] = ["LANGUAGES", "languages", "Languages", "language", "langs"];
const INDUSTRY_KEYS: [&str; 5] = ["INDUSTRIES", "industries", "Industries", "sectors", "industry"];
const EXPERIENCE_KEYS: [&str; 2] = ["EXPERIENCE", "experience"];
const EDUCATION_KEYS: [&str; 2] = ["EDUCATION", "education"];

// ────────────────────────────────────────────────────────────────────────────
// Canonical entry shapes
// ────────────────────────────────────────────────────────────────────────────

/// A bullet item. `.` is the key template loops read with `{.}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bullet {
    pub value: String,
    #[serde(rename = ".")]
    pub dot: String,
}

impl Bullet {
    fn new(text: &str) -> Self {
        Self {
            value: text.to_string(),
            dot: text.to_string(),
        }
    }
}

/// One experience entry. Every field is always present; missing data is an
/// empty string or an empty list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperienceEntry {
    pub company: String,
    pub role: String,
    pub period: String,
    pub location: String,
    pub summary: String,
    pub bullets: Vec<Bullet>,
    pub bullets_lines: String,
    pub tech: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EducationEntry {
    pub institution: String,
    pub degree: String,
    pub period: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Public entry point
// ────────────────────────────────────────────────────────────────────────────

/// Full pipeline: derived fields, entry canonicalisation, value normalization.
pub fn prepare_fields(raw: &Map<String, Value>) -> Map<String, Value> {
    let enriched = add_derived_fields(raw);
    let mut prepared = Map::new();

    for (key, value) in &enriched {
        if EXPERIENCE_KEYS.contains(&key.as_str()) {
            let entries = build_experience_entries(value);
            prepared.insert(key.clone(), to_value(&entries));
        } else if EDUCATION_KEYS.contains(&key.as_str()) {
            let entries = build_education_entries(value);
            prepared.insert(key.clone(), to_value(&entries));
        } else {
            prepared.insert(key.clone(), normalize_entry(key, value));
        }
    }

    if text_of(prepared.get("EXPERIENCE_LINES")).is_none() {
        let lines = EXPERIENCE_KEYS
            .iter()
            .find_map(|key| enriched.get(*key))
            .map(|value| experience_lines(&build_experience_entries(value)))
            .unwrap_or_default();
        if !lines.is_empty() || prepared.contains_key("EXPERIENCE_LINES") {
            prepared.insert("EXPERIENCE_LINES".to_string(), Value::String(lines));
        }
    }

    prepared
}

fn to_value<T: Serialize>(entries: &[T]) -> Value {
    // Plain structs of strings cannot fail to serialize.
    serde_json::to_value(entries).unwrap_or_else(|_| Value::Array(Vec::new()))
}

// ────────────────────────────────────────────────────────────────────────────
// Generic normalization
// ────────────────────────────────────────────────────────────────────────────

fn text_of(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn first_text(entry: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| text_of(entry.get(*key)))
        .unwrap_or_default()
        .to_string()
}

/// Arrays pass through, strings split on newlines and commas, `null` is empty.
pub fn to_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(text) => text
            .split(['\r', '\n', ','])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn is_empty_object(map: &Map<String, Value>) -> bool {
    map.values().all(|value| match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(inner) => is_empty_object(inner),
        Value::String(text) => text.is_empty(),
        _ => false,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => is_empty_object(map),
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::String(_) => value.clone(),
        Value::Bool(flag) => Value::String(flag.to_string()),
        Value::Number(number) => Value::String(number.to_string()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(normalize_value)
                .filter(|item| !is_blank(item))
                .collect(),
        ),
        Value::Object(map) => Value::Object(normalize_fields(map)),
    }
}

fn normalize_entry(key: &str, value: &Value) -> Value {
    match value {
        Value::Array(items) if key == "bullets" || key == "highlights" => {
            let bullets: Vec<Bullet> = bullet_texts(items).iter().map(|t| Bullet::new(t)).collect();
            to_value(&bullets)
        }
        other => normalize_value(other),
    }
}

pub fn normalize_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), normalize_entry(key, value)))
        .collect()
}

fn bullet_texts(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Object(map) => ["value", ".", "text", "description"]
                .iter()
                .find_map(|key| text_of(map.get(*key)))
                .map(str::to_string),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Entry canonicalisation
// ────────────────────────────────────────────────────────────────────────────

pub fn build_experience_entries(value: &Value) -> Vec<ExperienceEntry> {
    to_list(value)
        .iter()
        .filter_map(|entry| match entry {
            Value::String(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| ExperienceEntry {
                    company: String::new(),
                    role: text.to_string(),
                    period: String::new(),
                    location: String::new(),
                    summary: text.to_string(),
                    bullets: Vec::new(),
                    bullets_lines: String::new(),
                    tech: String::new(),
                })
            }
            Value::Object(map) => experience_from_object(map),
            _ => None,
        })
        .collect()
}

fn experience_from_object(entry: &Map<String, Value>) -> Option<ExperienceEntry> {
    let company = first_text(entry, &["company", "employer", "organization"]);
    let role = first_text(entry, &["role", "title"]);
    let period = first_text(entry, &["period", "dates", "date"]);
    let location = first_text(entry, &["location", "city"]);
    let mut summary = first_text(entry, &["summary", "description"]);
    let tech = first_text(entry, &["tech", "stack", "technologies", "tools"]);

    let raw_bullets = ["bullets", "highlights"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_array))
        .map(|items| bullet_texts(items))
        .unwrap_or_default();

    let bullets_lines = match text_of(entry.get("bullets_lines")) {
        Some(lines) => lines.to_string(),
        None => bullet_lines(raw_bullets.iter().map(String::as_str)),
    };

    let only_role = company.is_empty()
        && period.is_empty()
        && location.is_empty()
        && summary.is_empty()
        && tech.is_empty()
        && raw_bullets.is_empty();
    if only_role && role.is_empty() {
        return None;
    }
    if only_role {
        summary = role.clone();
    }

    Some(ExperienceEntry {
        company,
        role,
        period,
        location,
        summary,
        bullets: raw_bullets.iter().map(|text| Bullet::new(text)).collect(),
        bullets_lines,
        tech,
    })
}

pub fn build_education_entries(value: &Value) -> Vec<EducationEntry> {
    to_list(value)
        .iter()
        .filter_map(|entry| {
            let education = match entry {
                Value::String(text) => EducationEntry {
                    institution: text.trim().to_string(),
                    degree: String::new(),
                    period: String::new(),
                },
                Value::Object(map) => EducationEntry {
                    institution: first_text(map, &["institution", "school", "university"]),
                    degree: first_text(map, &["degree", "title", "program"]),
                    period: first_text(map, &["period", "dates", "date", "year"]),
                },
                _ => return None,
            };
            let empty = education.institution.is_empty()
                && education.degree.is_empty()
                && education.period.is_empty();
            (!empty).then_some(education)
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Derived fields
// ────────────────────────────────────────────────────────────────────────────

fn bullet_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for line in lines.map(str::trim).filter(|line| !line.is_empty()) {
        if !seen.contains(&line) {
            seen.push(line);
        }
    }
    seen.iter()
        .map(|line| {
            if line.starts_with(BULLET_CHAR) {
                line.to_string()
            } else {
                format!("{BULLET_CHAR} {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn language_label(entry: &Value) -> String {
    match entry {
        Value::String(text) => text.trim().to_string(),
        Value::Object(map) => {
            let name = first_text(map, &["language", "name", "label", "text"]);
            let level = first_text(map, &["level", "proficiency", "fluency", "description"]);
            match (name.is_empty(), level.is_empty()) {
                (true, _) => String::new(),
                (false, true) => name,
                (false, false) => format!("{name} ({level})"),
            }
        }
        _ => String::new(),
    }
}

fn industry_labels(entry: &Value) -> Vec<String> {
    match entry {
        Value::String(text) => text.lines().map(|line| line.trim().to_string()).collect(),
        Value::Object(map) => vec![first_text(map, &["name", "label", "text", "value"])],
        _ => Vec::new(),
    }
}

fn source_for<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| fields.get(*key))
        .filter(|value| !is_blank(value))
}

/// Backfills `LANGUAGES_LINES` and `INDUSTRIES_LINES` from list-shaped
/// sources. Caller-supplied line strings are never overwritten; both keys
/// always exist afterwards.
pub fn add_derived_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    let mut draft = fields.clone();

    if text_of(draft.get("LANGUAGES_LINES")).is_none() {
        if let Some(source) = source_for(fields, &LANGUAGE_KEYS) {
            let labels: Vec<String> = to_list(source).iter().map(language_label).collect();
            let lines = bullet_lines(labels.iter().map(String::as_str));
            if !lines.is_empty() {
                draft.insert("LANGUAGES_LINES".to_string(), Value::String(lines));
            }
        }
    }

    if text_of(draft.get("INDUSTRIES_LINES")).is_none() {
        if let Some(source) = source_for(fields, &INDUSTRY_KEYS) {
            let labels: Vec<String> = to_list(source).iter().flat_map(industry_labels).collect();
            let lines = bullet_lines(labels.iter().map(String::as_str));
            if !lines.is_empty() {
                draft.insert("INDUSTRIES_LINES".to_string(), Value::String(lines));
            }
        }
    }

    for key in ["LANGUAGES_LINES", "INDUSTRIES_LINES"] {
        if text_of(draft.get(key)).is_none() {
            draft.insert(key.to_string(), Value::String(String::new()));
        }
    }

    draft
}

fn experience_lines(entries: &[ExperienceEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let header = [&entry.role, &entry.company, &entry.period, &entry.location]
                .iter()
                .filter(|part| !part.is_empty())
                .map(|part| part.as_str())
                .collect::<Vec<_>>()
                .join(" | ");
            let mut block = vec![header];
            if !entry.summary.is_empty() && entry.summary != entry.role {
                block.push(entry.summary.clone());
            }
            if !entry.bullets_lines.is_empty() {
                block.push(entry.bullets_lines.clone());
            }
            if !entry.tech.is_empty() {
                block.push(format!("Tech: {}", entry.tech));
            }
            block.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
