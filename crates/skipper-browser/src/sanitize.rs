//! Page-content sanitization.
//!
//! Reduces raw markup to a pretty-printed skeleton the model can read
//! without blowing the prompt budget: non-essential elements are dropped
//! entirely, only an allow-listed attribute set is retained, and the total
//! output is size-capped.

use std::fmt::Write as _;

use scraper::node::Node;
use scraper::{ElementRef, Html};

/// Elements removed wholesale, subtrees included.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "svg", "canvas", "link", "meta", "iframe", "object", "embed",
    "template", "source", "track", "path",
];

/// Attributes worth showing to the model; everything else is dropped.
const KEPT_ATTRIBUTES: &[&str] = &[
    "id",
    "class",
    "href",
    "src",
    "alt",
    "title",
    "name",
    "type",
    "value",
    "placeholder",
    "role",
    "aria-label",
];

/// Indentation depth beyond which nesting stops adding signal.
const MAX_DEPTH: usize = 24;

/// Cap on the sanitized output, in characters.
pub const MAX_CONTENT_CHARS: usize = 40_000;

/// Reduce raw page markup to pretty-printed, allow-listed text.
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();

    if let Some(body) = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
    {
        render_children(body, 0, &mut out);
    } else {
        render_children(document.root_element(), 0, &mut out);
    }

    truncate_chars(out.trim_end(), MAX_CONTENT_CHARS)
}

fn render_children(el: ElementRef<'_>, depth: usize, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_element(child_el, depth, out);
                }
            }
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    indent(depth, out);
                    out.push_str(text);
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn render_element(el: ElementRef<'_>, depth: usize, out: &mut String) {
    let name = el.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }

    indent(depth, out);
    out.push('<');
    out.push_str(name);
    for attr in KEPT_ATTRIBUTES {
        if let Some(value) = el.value().attr(attr) {
            if !value.is_empty() {
                let _ = write!(out, r#" {attr}="{}""#, collapse_whitespace(value));
            }
        }
    }
    out.push_str(">\n");

    render_children(el, (depth + 1).min(MAX_DEPTH), out);
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// UTF-8-safe truncation with an explicit marker.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max).collect();
    format!("{kept}\n... [content truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_scripts_and_styles_entirely() {
        let html = r#"<html><body>
            <script>alert(1)</script>
            <style>p { color: red }</style>
            <p>visible text</p>
        </body></html>"#;
        let out = clean_html(html);
        assert!(out.contains("visible text"));
        assert!(!out.contains("alert"));
        assert!(!out.contains("color: red"));
    }

    #[test]
    fn keeps_only_allowlisted_attributes() {
        let html = r#"<body><a href="/next" data-tracking="xyz" onclick="go()" id="link1">Next</a></body>"#;
        let out = clean_html(html);
        assert!(out.contains(r#"href="/next""#));
        assert!(out.contains(r#"id="link1""#));
        assert!(!out.contains("data-tracking"));
        assert!(!out.contains("onclick"));
    }

    #[test]
    fn text_nodes_are_trimmed_and_kept() {
        let html = "<body><div>  hello   </div></body>";
        let out = clean_html(html);
        assert!(out.contains("hello"));
        assert!(!out.contains("  hello"));
    }

    #[test]
    fn nesting_is_indented() {
        let html = "<body><div><p>deep</p></div></body>";
        let out = clean_html(html);
        let div_line = out.lines().find(|l| l.contains("<div")).unwrap();
        let p_line = out.lines().find(|l| l.contains("<p")).unwrap();
        let indent_of = |l: &str| l.len() - l.trim_start().len();
        assert!(indent_of(p_line) > indent_of(div_line));
    }

    #[test]
    fn form_controls_keep_their_signal_attributes() {
        let html = r#"<body><input type="text" name="q" placeholder="Search" style="width:10em"></body>"#;
        let out = clean_html(html);
        assert!(out.contains(r#"type="text""#));
        assert!(out.contains(r#"name="q""#));
        assert!(out.contains(r#"placeholder="Search""#));
        assert!(!out.contains("style="));
    }

    #[test]
    fn output_is_size_capped() {
        let html = format!("<body><p>{}</p></body>", "word ".repeat(20_000));
        let out = clean_html(&html);
        assert!(out.chars().count() <= MAX_CONTENT_CHARS + 30);
        assert!(out.ends_with("[content truncated]"));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(clean_html(""), "");
    }

    #[test]
    fn malformed_html_is_best_effort() {
        let out = clean_html("<div><p>unclosed<b>bold</div>");
        assert!(out.contains("unclosed"));
        assert!(out.contains("bold"));
    }

    #[test]
    fn attribute_whitespace_is_collapsed() {
        let html = "<body><div class=\"a   b\n  c\">x</div></body>";
        let out = clean_html(html);
        assert!(out.contains(r#"class="a b c""#));
    }
}
