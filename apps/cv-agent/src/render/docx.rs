// DOCX template engine.
//
// Tags: `{NAME}` substitutes, `{#LIST}…{/LIST}` loops (or renders once for a
// truthy scalar/object), `{^LIST}…{/LIST}` renders only when LIST is falsy,
// `{.}` is the current loop item. Word splits typed text into several runs,
// so tags spread over consecutive `<w:t>` nodes are merged before parsing.
// When both tags of a section sit alone in their paragraphs, those paragraphs
// are dropped, so loops repeat whole paragraphs instead of leaving empty ones.
//
// Synchronous and CPU-bound: callers run it inside spawn_blocking.

use std::io::{Cursor, Read, Write};

use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::RenderError;

const LINE_BREAK: &str = "</w:t><w:br/><w:t xml:space=\"preserve\">";

/// Renders every templated part of a DOCX archive; other parts are copied.
pub fn render_docx(template: &[u8], data: &Value) -> Result<Vec<u8>, RenderError> {
    let mut archive = ZipArchive::new(Cursor::new(template))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            writer.add_directory(name, options)?;
            continue;
        }

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| RenderError::Template(format!("{name}: {e}")))?;

        if is_templated_part(&name) {
            let xml = String::from_utf8(contents)
                .map_err(|_| RenderError::Template(format!("{name} is not valid UTF-8")))?;
            contents = render_xml(&xml, data)
                .map_err(|e| RenderError::Template(format!("{name}: {e}")))?
                .into_bytes();
        }

        writer.start_file(name.clone(), options)?;
        writer
            .write_all(&contents)
            .map_err(|e| RenderError::Template(format!("{name}: {e}")))?;
    }

    Ok(writer.finish()?.into_inner())
}

fn is_templated_part(name: &str) -> bool {
    name == "word/document.xml"
        || ((name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml"))
}

// ────────────────────────────────────────────────────────────────────────────
// Lexing
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Markup(String),
    /// Character data inside a `<w:t>` element, still XML-escaped.
    Text(String),
}

fn is_text_open(tag: &str) -> bool {
    (tag.starts_with("<w:t>") || tag.starts_with("<w:t ")) && !tag.ends_with("/>")
}

fn split_segments(xml: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut in_text = false;
    let mut rest = xml;

    while !rest.is_empty() {
        match rest.find('<') {
            Some(0) => {
                let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
                let tag = &rest[..end];
                if is_text_open(tag) {
                    in_text = true;
                } else if tag == "</w:t>" {
                    in_text = false;
                }
                segments.push(Segment::Markup(tag.to_string()));
                rest = &rest[end..];
            }
            Some(start) => {
                push_chars(&mut segments, &rest[..start], in_text);
                rest = &rest[start..];
            }
            None => {
                push_chars(&mut segments, rest, in_text);
                rest = "";
            }
        }
    }
    segments
}

fn push_chars(segments: &mut Vec<Segment>, chars: &str, in_text: bool) {
    if in_text {
        segments.push(Segment::Text(chars.to_string()));
    } else {
        segments.push(Segment::Markup(chars.to_string()));
    }
}

fn has_unclosed_brace(text: &str) -> bool {
    text.rfind('{') > text.rfind('}')
}

/// Pulls the tail of a split tag back into the text node where it opened.
fn merge_split_tags(segments: &mut [Segment]) -> Result<(), String> {
    let mut open: Option<usize> = None;

    for index in 0..segments.len() {
        let Segment::Text(text) = &segments[index] else {
            continue;
        };
        let mut text = text.clone();

        if let Some(start) = open {
            let moved = match text.find('}') {
                Some(close) => {
                    let head = text[..=close].to_string();
                    text = text[close + 1..].to_string();
                    open = None;
                    head
                }
                None => std::mem::take(&mut text),
            };
            if let Segment::Text(target) = &mut segments[start] {
                target.push_str(&moved);
            }
            segments[index] = Segment::Text(text.clone());
            if open.is_some() {
                continue;
            }
        }

        if has_unclosed_brace(&text) {
            open = Some(index);
        }
    }

    match open {
        Some(_) => Err("unclosed tag".to_string()),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tag {
    Var(String),
    Open(String),
    Inverted(String),
    Close(String),
}

impl Tag {
    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (tag, name): (fn(String) -> Tag, &str) = match raw.chars().next() {
            Some('#') => (Tag::Open, &raw[1..]),
            Some('^') => (Tag::Inverted, &raw[1..]),
            Some('/') => (Tag::Close, &raw[1..]),
            _ => (Tag::Var, raw),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("empty tag {{{raw}}}"));
        }
        Ok(tag(name.to_string()))
    }

    fn is_section(&self) -> bool {
        !matches!(self, Tag::Var(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Markup(String),
    Text(String),
    Tag(Tag),
}

fn tokenize(segments: Vec<Segment>) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    for segment in segments {
        match segment {
            Segment::Markup(markup) => tokens.push(Token::Markup(markup)),
            Segment::Text(text) => {
                let mut rest = text.as_str();
                while let Some(open) = rest.find('{') {
                    if open > 0 {
                        tokens.push(Token::Text(rest[..open].to_string()));
                    }
                    let close = rest[open..]
                        .find('}')
                        .map(|i| open + i)
                        .ok_or_else(|| "unclosed tag".to_string())?;
                    tokens.push(Token::Tag(Tag::parse(&rest[open + 1..close])?));
                    rest = &rest[close + 1..];
                }
                if !rest.is_empty() {
                    tokens.push(Token::Text(rest.to_string()));
                }
            }
        }
    }
    Ok(tokens)
}

fn is_paragraph_open(markup: &str) -> bool {
    markup.starts_with("<w:p>") || markup.starts_with("<w:p ")
}

/// Span of the paragraph around `index` if the section tag there is the only
/// visible content of that paragraph.
fn lone_paragraph(tokens: &[Token], index: usize) -> Option<(usize, usize)> {
    let start = tokens[..index].iter().rposition(|token| match token {
        Token::Markup(markup) => is_paragraph_open(markup) || markup == "</w:p>",
        _ => false,
    })?;
    if !matches!(&tokens[start], Token::Markup(m) if is_paragraph_open(m)) {
        return None;
    }
    let end = index
        + tokens[index..]
            .iter()
            .position(|token| matches!(token, Token::Markup(m) if m == "</w:p>"))?;

    let alone = tokens[start..=end]
        .iter()
        .enumerate()
        .all(|(offset, token)| match token {
            Token::Markup(_) => true,
            Token::Text(text) => text.trim().is_empty(),
            Token::Tag(_) => start + offset == index,
        });
    alone.then_some((start, end))
}

/// Index pairs of matching section open/close tags. Mismatches are skipped
/// here and reported by `parse`.
fn section_pairs(tokens: &[Token]) -> Vec<(usize, usize)> {
    let mut open: Vec<(usize, &str)> = Vec::new();
    let mut pairs = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Tag(Tag::Open(name) | Tag::Inverted(name)) => open.push((index, name)),
            Token::Tag(Tag::Close(name)) => {
                if let Some(&(start, open_name)) = open.last() {
                    if open_name == name {
                        open.pop();
                        pairs.push((start, index));
                    }
                }
            }
            _ => {}
        }
    }
    pairs
}

/// Replaces a section's paragraphs by its bare tags, but only when the
/// opening and the closing tag each sit alone in their own paragraph.
fn collapse_section_paragraphs(tokens: &mut Vec<Token>) {
    let mut spans: Vec<(usize, usize, usize)> = Vec::new();
    for (open, close) in section_pairs(tokens) {
        if let (Some(open_span), Some(close_span)) =
            (lone_paragraph(tokens, open), lone_paragraph(tokens, close))
        {
            spans.push((open_span.0, open_span.1, open));
            spans.push((close_span.0, close_span.1, close));
        }
    }

    spans.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    for (start, end, tag_index) in spans {
        let tag = tokens[tag_index].clone();
        tokens.splice(start..=end, [tag]);
    }
}

/// Net element depth of the markup directly inside a section body.
fn markup_balance(body: &[Node]) -> i32 {
    body.iter()
        .map(|node| match node {
            Node::Raw(raw) if raw.starts_with("</") => -1,
            Node::Raw(raw)
                if raw.starts_with('<')
                    && !raw.starts_with("<?")
                    && !raw.starts_with("<!")
                    && !raw.ends_with("/>") =>
            {
                1
            }
            _ => 0,
        })
        .sum()
}

// ────────────────────────────────────────────────────────────────────────────
// Parsing and rendering
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Raw(String),
    Var(String),
    Section {
        name: String,
        inverted: bool,
        body: Vec<Node>,
    },
}

fn parse(tokens: Vec<Token>) -> Result<Vec<Node>, String> {
    // (name, inverted, parent body)
    let mut stack: Vec<(String, bool, Vec<Node>)> = Vec::new();
    let mut current: Vec<Node> = Vec::new();

    for token in tokens {
        match token {
            Token::Markup(raw) | Token::Text(raw) => current.push(Node::Raw(raw)),
            Token::Tag(Tag::Var(name)) => current.push(Node::Var(name)),
            Token::Tag(Tag::Open(name)) => {
                stack.push((name, false, std::mem::take(&mut current)));
            }
            Token::Tag(Tag::Inverted(name)) => {
                stack.push((name, true, std::mem::take(&mut current)));
            }
            Token::Tag(Tag::Close(name)) => {
                let (open_name, inverted, parent) = stack
                    .pop()
                    .ok_or_else(|| format!("closing tag {{/{name}}} without an opening tag"))?;
                if open_name != name {
                    return Err(format!(
                        "mismatched closing tag {{/{name}}}, expected {{/{open_name}}}"
                    ));
                }
                let body = std::mem::replace(&mut current, parent);
                if markup_balance(&body) != 0 {
                    return Err(format!(
                        "section {{#{name}}} crosses document structure; keep {{#{name}}} and \
                         {{/{name}}} in one paragraph or each alone in its own paragraph"
                    ));
                }
                current.push(Node::Section {
                    name,
                    inverted,
                    body,
                });
            }
        }
    }

    if let Some((name, _, _)) = stack.pop() {
        return Err(format!("unclosed section {{#{name}}}"));
    }
    Ok(current)
}

fn lookup<'a>(scopes: &[&'a Value], name: &str) -> Option<&'a Value> {
    if name == "." {
        return scopes.last().copied();
    }
    scopes
        .iter()
        .rev()
        .find_map(|scope| scope.as_object().and_then(|map| map.get(name)))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

fn display_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get(".")
            .or_else(|| map.get("value"))
            .map(display_text)
            .unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .map(display_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\r' => {}
            '\n' => escaped.push_str(LINE_BREAK),
            other => escaped.push(other),
        }
    }
    escaped
}

fn render_nodes<'a>(nodes: &[Node], scopes: &mut Vec<&'a Value>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Raw(raw) if raw == "<w:t>" => out.push_str("<w:t xml:space=\"preserve\">"),
            Node::Raw(raw) => out.push_str(raw),
            Node::Var(name) => {
                if let Some(value) = lookup(scopes, name) {
                    out.push_str(&escape_xml(&display_text(value)));
                }
            }
            Node::Section {
                name,
                inverted,
                body,
            } => {
                let value = lookup(scopes, name);
                let truthy = value.is_some_and(is_truthy);
                match (*inverted, value) {
                    (true, _) if !truthy => render_nodes(body, scopes, out),
                    (false, Some(Value::Array(items))) if truthy => {
                        for item in items {
                            scopes.push(item);
                            render_nodes(body, scopes, out);
                            scopes.pop();
                        }
                    }
                    (false, Some(value)) if truthy => {
                        scopes.push(value);
                        render_nodes(body, scopes, out);
                        scopes.pop();
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Renders one WordprocessingML part.
fn render_xml(xml: &str, data: &Value) -> Result<String, String> {
    let mut segments = split_segments(xml);
    merge_split_tags(&mut segments)?;
    let mut tokens = tokenize(segments)?;
    collapse_section_paragraphs(&mut tokens);
    let nodes = parse(tokens)?;

    let mut out = String::with_capacity(xml.len());
    let mut scopes = vec![data];
    render_nodes(&nodes, &mut scopes, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paragraph(runs: &[&str]) -> String {
        let runs: String = runs
            .iter()
            .map(|text| format!("<w:r><w:rPr><w:b/></w:rPr><w:t>{text}</w:t></w:r>"))
            .collect();
        format!("<w:p><w:pPr><w:jc w:val=\"left\"/></w:pPr>{runs}</w:p>")
    }

    fn document(paragraphs: &[String]) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{}</w:body></w:document>",
            paragraphs.concat()
        )
    }

    fn build_docx(document_xml: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer.add_directory("word/", options).unwrap();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn read_part(docx: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(docx)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut xml = String::new();
        part.read_to_string(&mut xml).unwrap();
        xml
    }

    #[test]
    fn test_tag_split_across_runs_is_merged() {
        let xml = document(&[paragraph(&["Name: {NA", "ME", "} ({ROLE})"])]);
        let out = render_xml(&xml, &json!({"NAME": "Ada", "ROLE": "Engineer"})).unwrap();
        assert!(out.contains("Name: Ada"));
        assert!(out.contains(" (Engineer)"));
        assert!(!out.contains('{'));
    }

    #[test]
    fn test_values_are_escaped_and_newlines_become_breaks() {
        let xml = document(&[paragraph(&["{LINES}"])]);
        let out = render_xml(&xml, &json!({"LINES": "• R&D\n• <Ops>"})).unwrap();
        assert!(out.contains("• R&amp;D</w:t><w:br/><w:t xml:space=\"preserve\">• &lt;Ops&gt;"));
    }

    #[test]
    fn test_paragraph_loop_repeats_whole_paragraphs() {
        let xml = document(&[
            paragraph(&["{#EXPERIENCE}"]),
            paragraph(&["{role} at {company}"]),
            paragraph(&["{#bullets}"]),
            paragraph(&["- {.}"]),
            paragraph(&["{/bullets}"]),
            paragraph(&["{/EXPERIENCE}"]),
        ]);
        let data = json!({"EXPERIENCE": [
            {"role": "Dev", "company": "Acme", "bullets": [{"value": "Shipped", ".": "Shipped"}]},
            {"role": "Lead", "company": "Initech", "bullets": []}
        ]});
        let out = render_xml(&xml, &data).unwrap();

        assert!(out.contains("Dev at Acme"));
        assert!(out.contains("Lead at Initech"));
        assert!(out.contains("- Shipped"));
        assert_eq!(out.matches("<w:p>").count(), 3, "two entries plus one bullet");
        assert!(!out.contains("EXPERIENCE"));
    }

    #[test]
    fn test_inline_sections_and_inverted_sections() {
        let xml = document(&[paragraph(&["{#ROLE}Role: {ROLE}{/ROLE}{^SKILLS}No skills{/SKILLS}"])]);
        let out = render_xml(&xml, &json!({"ROLE": "", "SKILLS": []})).unwrap();
        assert!(!out.contains("Role:"));
        assert!(out.contains("No skills"));

        let out = render_xml(&xml, &json!({"ROLE": "Dev", "SKILLS": ["Rust"]})).unwrap();
        assert!(out.contains("Role: Dev"));
        assert!(!out.contains("No skills"));
    }

    #[test]
    fn test_missing_values_render_empty() {
        let xml = document(&[paragraph(&["[{MISSING}]"])]);
        let out = render_xml(&xml, &json!({})).unwrap();
        assert!(out.contains("[]"));
    }

    #[test]
    fn test_outer_scope_visible_inside_loop() {
        let xml = document(&[paragraph(&["{#EDUCATION}{institution} / {NAME}{/EDUCATION}"])]);
        let data = json!({"NAME": "Ada", "EDUCATION": [{"institution": "MIT"}]});
        let out = render_xml(&xml, &data).unwrap();
        assert!(out.contains("MIT / Ada"));
    }

    #[test]
    fn test_malformed_templates_are_rejected() {
        let unclosed_section = document(&[paragraph(&["{#LIST}x"])]);
        assert!(render_xml(&unclosed_section, &json!({}))
            .unwrap_err()
            .contains("unclosed section"));

        let mismatched = document(&[paragraph(&["{#A}x{/B}"])]);
        assert!(render_xml(&mismatched, &json!({}))
            .unwrap_err()
            .contains("mismatched"));

        let unclosed_tag = document(&[paragraph(&["{NAME"])]);
        assert!(render_xml(&unclosed_tag, &json!({})).is_err());
    }

    #[test]
    fn test_lone_open_with_inline_close_keeps_paragraphs_balanced() {
        let xml = document(&[paragraph(&["{#A}"]), paragraph(&["x{/A}"])]);

        let hidden = render_xml(&xml, &json!({"A": false})).unwrap();
        assert_eq!(hidden.matches("<w:p>").count(), 1);
        assert_eq!(hidden.matches("</w:p>").count(), 1);
        assert!(!hidden.contains(">x<"));

        let shown = render_xml(&xml, &json!({"A": true})).unwrap();
        assert_eq!(shown.matches("<w:p>").count(), 2);
        assert_eq!(shown.matches("</w:p>").count(), 2);
        assert!(shown.contains(">x<"));
    }

    #[test]
    fn test_section_crossing_a_table_is_rejected() {
        let xml = "<w:body><w:tbl><w:tr><w:tc><w:p><w:r><w:t>{#A}</w:t></w:r></w:p></w:tc></w:tr></w:tbl>\
                   <w:p><w:r><w:t>x{/A}</w:t></w:r></w:p></w:body>";
        let err = render_xml(xml, &json!({"A": false})).unwrap_err();
        assert!(err.contains("crosses document structure"), "{err}");

        let docx = build_docx(xml);
        assert!(matches!(
            render_docx(&docx, &json!({"A": false})),
            Err(RenderError::Template(_))
        ));
    }

    #[test]
    fn test_render_docx_rewrites_document_and_copies_other_parts() {
        let template = build_docx(&document(&[paragraph(&["{NAME}"])]));
        let rendered = render_docx(&template, &json!({"NAME": "Ada Lovelace"})).unwrap();

        assert!(read_part(&rendered, "word/document.xml").contains("Ada Lovelace"));
        assert_eq!(read_part(&rendered, "[Content_Types].xml"), "<Types/>");
        // template bytes untouched
        assert!(read_part(&template, "word/document.xml").contains("{NAME}"));
    }

    #[test]
    fn test_render_docx_rejects_non_archives() {
        let err = render_docx(b"not a zip", &json!({})).unwrap_err();
        assert!(matches!(err, RenderError::Archive(_)));
    }
}
