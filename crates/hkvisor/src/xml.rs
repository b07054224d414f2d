//! Namespace-agnostic tag scanning for the small, flat XML documents cameras push.
//!
//! Event payloads carry a handful of leaf elements under one root, so a full
//! XML parser is not needed; this finds the first element with a given local
//! name and returns its decoded text.

/// Start tag located in a document.
struct StartTag {
    /// Byte offset just past the closing `>`
    content_start: usize,
    self_closing: bool,
}

/// Local name of a tag body such as `hik:eventType attr="x"`.
fn local_name(tag_body: &str) -> &str {
    let name = tag_body
        .split(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .next()
        .unwrap_or("");
    name.rsplit(':').next().unwrap_or(name)
}

fn find_start_tag(xml: &str, tag: &str) -> Option<StartTag> {
    let mut offset = 0;
    while let Some(rel) = xml[offset..].find('<') {
        let open = offset + rel;
        let rest = &xml[open + 1..];
        let close = rest.find('>')?;
        let body = &rest[..close];
        offset = open + 1;

        if body.starts_with('/') || body.starts_with('?') || body.starts_with('!') {
            continue;
        }
        if local_name(body) == tag {
            return Some(StartTag {
                content_start: open + 1 + close + 1,
                self_closing: body.ends_with('/'),
            });
        }
    }
    None
}

fn find_end_tag(xml: &str, from: usize, tag: &str) -> Option<usize> {
    let mut offset = from;
    while let Some(rel) = xml[offset..].find("</") {
        let open = offset + rel;
        let rest = &xml[open + 2..];
        let close = rest.find('>')?;
        if local_name(rest[..close].trim()) == tag {
            return Some(open);
        }
        offset = open + 2;
    }
    None
}

/// Whether an element with this local name appears anywhere in `xml`.
pub fn has_element(xml: &str, tag: &str) -> bool {
    find_start_tag(xml, tag).is_some()
}

/// Trimmed, entity-decoded text of the first element named `tag`.
///
/// Returns `Some("")` for empty or self-closing elements and `None` when the
/// element is absent or never closed.
pub fn element_text(xml: &str, tag: &str) -> Option<String> {
    let start = find_start_tag(xml, tag)?;
    if start.self_closing {
        return Some(String::new());
    }
    let end = find_end_tag(xml, start.content_start, tag)?;
    Some(decode_entities(xml[start.content_start..end].trim()))
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
