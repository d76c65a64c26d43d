use regex::Regex;
use scraper::{Html, Selector};

use crate::error::AppError;

/// Outer markup of every element matching `selector`, joined by newlines.
///
/// Without a selector the whole document is returned unchanged. No
/// match yields an empty string.
pub fn select_fragment(html: &str, selector: Option<&str>) -> Result<String, AppError> {
    let Some(selector) = selector else {
        return Ok(html.to_string());
    };
    let selector = Selector::parse(selector)
        .map_err(|e| AppError::Configuration(format!("Invalid selector '{selector}': {e}")))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .map(|el| el.html())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Keep only the first full match of `pattern`; no match yields "".
pub fn first_match(pattern: &Regex, content: &str) -> String {
    pattern
        .find(content)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div class="item">One</div>
        <p>skip</p>
        <div class="item"><b>Two</b></div>
    </body></html>"#;

    #[test]
    fn test_no_selector_returns_body() {
        assert_eq!(select_fragment(PAGE, None).unwrap(), PAGE);
    }

    #[test]
    fn test_selector_joins_outer_markup() {
        let fragment = select_fragment(PAGE, Some(".item")).unwrap();
        assert_eq!(
            fragment,
            "<div class=\"item\">One</div>\n<div class=\"item\"><b>Two</b></div>"
        );
    }

    #[test]
    fn test_selector_without_match_is_empty() {
        assert_eq!(select_fragment(PAGE, Some("#missing")).unwrap(), "");
    }

    #[test]
    fn test_invalid_selector_is_error() {
        assert!(select_fragment(PAGE, Some("[[[")).is_err());
    }

    #[test]
    fn test_first_match_only() {
        let pattern = Regex::new(r"\d+ EUR").unwrap();
        assert_eq!(first_match(&pattern, "was 12 EUR, now 10 EUR"), "12 EUR");
        assert_eq!(first_match(&pattern, "sold out"), "");
    }
}
