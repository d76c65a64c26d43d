//! HTML fragment → canonical text.
//!
//! Canonical text is what gets hashed, so this must stay a pure function
//! of its input: re-renders that only differ cosmetically (attribute
//! order, indentation, comments, scripts) produce the same text.

use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

const BLOCK_TAGS: &[&str] = &[
    "p",
    "div",
    "section",
    "article",
    "header",
    "footer",
    "aside",
    "nav",
    "ul",
    "ol",
    "li",
    "table",
    "thead",
    "tbody",
    "tfoot",
    "tr",
    "th",
    "td",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "figure",
    "figcaption",
    "form",
    "label",
    "blockquote",
];

/// Render an HTML fragment as canonical text.
///
/// Block-level elements start and end lines, `<br>` forces a line break,
/// form controls contribute their visible value, and every line is
/// whitespace-collapsed and trimmed with empty lines dropped.
pub fn normalize(html: &str) -> String {
    let without_comments = COMMENT.replace_all(html, "");
    let document = Html::parse_document(&without_comments);

    let mut out = String::new();
    let body = document
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body");
    match body {
        Some(body) => visit_children(body, &mut out),
        None => visit_children(document.root_element(), &mut out),
    }

    out.split('\n')
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn visit_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&collapse_inline(text)),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    visit_element(el, out);
                }
            }
            _ => {}
        }
    }
}

fn visit_element(element: ElementRef<'_>, out: &mut String) {
    let tag = element.value().name();
    match tag {
        "script" | "style" => {}
        "noscript" => visit_noscript(element, out),
        "br" => out.push('\n'),
        "select" => out.push_str(&collapse_whitespace(&selected_option_text(element))),
        "input" => out.push_str(&collapse_whitespace(input_text(element))),
        _ if BLOCK_TAGS.contains(&tag) => {
            out.push('\n');
            visit_children(element, out);
            out.push('\n');
        }
        _ => visit_children(element, out),
    }
}

/// The parser keeps `<noscript>` content as raw text; parse it again so
/// its markup is walked like any other element instead of leaking.
fn visit_noscript(element: ElementRef<'_>, out: &mut String) {
    let inner: String = element.text().collect();
    let fragment = Html::parse_fragment(&inner);
    visit_children(fragment.root_element(), out);
}

/// Text of the `selected` option, or of the first option.
fn selected_option_text(select: ElementRef<'_>) -> String {
    let options: Vec<ElementRef<'_>> = select
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "option")
        .collect();
    options
        .iter()
        .find(|opt| opt.value().attr("selected").is_some())
        .or_else(|| options.first())
        .map(|opt| opt.text().collect::<String>())
        .unwrap_or_default()
}

/// Buttons show their value; other inputs show value, else placeholder.
fn input_text<'a>(input: ElementRef<'a>) -> &'a str {
    let el = input.value();
    let value = el.attr("value").unwrap_or("");
    let is_button = el
        .attr("type")
        .is_some_and(|t| t.eq_ignore_ascii_case("submit") || t.eq_ignore_ascii_case("button"));
    if is_button || !value.is_empty() {
        value
    } else {
        el.attr("placeholder").unwrap_or("")
    }
}

/// Collapse whitespace runs inside a text node, keeping newlines as line
/// breaks so already-canonical text survives a second pass unchanged.
fn collapse_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c == '\n' {
            pending_space = false;
            out.push('\n');
        } else if c.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    if pending_space {
        out.push(' ');
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
