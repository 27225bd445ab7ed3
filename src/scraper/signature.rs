//! Fallback fingerprint for pages whose booking data stays opaque.

use crate::models::{Document, MarkerKind, StrategyId, WidgetSignature};
use scraper::node::Element;
use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

const HIDDEN_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

const DATE_WORDS: [&str; 5] = ["date", "checkin", "check-in", "arrival", "departure"];
const BUTTON_WORDS: [&str; 2] = ["btn", "button"];
const CALENDAR_WORDS: [&str; 5] = ["calendar", "datepicker", "sirvoy", "availability", "booking"];

pub const KEYWORDS: [&str; 8] = [
    "boka",
    "booking",
    "tillgänglig",
    "available",
    "calendar",
    "fullbokat",
    "ledigt",
    "sold out",
];

/// Whitespace-normalised text of every node a browser would render.
pub fn visible_text(doc: &Html) -> String {
    let mut words = Vec::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_TAGS.contains(&e.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

fn attr_mentions(el: &Element, attrs: &[&str], words: &[&str]) -> bool {
    attrs.iter().filter_map(|a| el.attr(a)).any(|value| {
        let value = value.to_lowercase();
        words.iter().any(|w| value.contains(w))
    })
}

fn classify(el: &Element) -> Option<MarkerKind> {
    let kind = el.attr("type").map(str::to_lowercase);
    match el.name() {
        "input" if kind.as_deref() == Some("date") => Some(MarkerKind::DateInput),
        "input" if matches!(kind.as_deref(), Some("submit" | "button")) => Some(MarkerKind::ActionButton),
        "input" if attr_mentions(el, &["name", "id", "class"], &DATE_WORDS) => Some(MarkerKind::DateInput),
        "select" => Some(MarkerKind::SelectControl),
        "button" => Some(MarkerKind::ActionButton),
        _ if attr_mentions(el, &["class"], &BUTTON_WORDS) => Some(MarkerKind::ActionButton),
        _ if attr_mentions(el, &["class", "id"], &CALENDAR_WORDS) => Some(MarkerKind::CalendarContainer),
        _ => None,
    }
}

pub fn element_counts(doc: &Html) -> BTreeMap<MarkerKind, usize> {
    let mut counts: BTreeMap<MarkerKind, usize> = MarkerKind::ALL.iter().map(|k| (*k, 0)).collect();
    for node in doc.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else { continue };
        if let Some(kind) = classify(el.value()) {
            *counts.entry(kind).or_default() += 1;
        }
    }
    counts
}

pub fn extract_signature(doc: &Document) -> WidgetSignature {
    let html = Html::parse_document(&doc.body);
    let text = visible_text(&html);
    let lowered = text.to_lowercase();

    WidgetSignature {
        content_hash: hex::encode(Sha256::digest(text.as_bytes())),
        byte_size: doc.body.len(),
        element_counts: element_counts(&html),
        keyword_set: KEYWORDS
            .iter()
            .filter(|k| lowered.contains(*k))
            .map(|k| k.to_string())
            .collect::<BTreeSet<_>>(),
        strategy: StrategyId::PageSignature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><head><style>.x{}</style><script>var hidden = "Boka";</script></head>
        <body>
          <h1>Bo &amp; Äta</h1>
          <p>Boka   ett rum, ledigt i juli.</p>
          <form>
            <input type="date" name="arrival">
            <input type="text" name="checkin_date">
            <input type="text" name="guest">
            <select name="rooms"><option>1</option></select>
            <button>Sök</button>
            <input type="submit" value="Skicka">
            <a class="btn-primary" href="#">Boka nu</a>
          </form>
          <div id="sbw_widget_1" class="sirvoy-container"></div>
          <div class="calendar"></div>
        </body></html>"##;

    #[test]
    fn test_visible_text_skips_scripts_and_styles() {
        let text = visible_text(&Html::parse_document(PAGE));
        assert!(text.starts_with("Bo & Äta Boka ett rum"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains(".x{}"));
    }

    #[test]
    fn test_marker_counts() {
        let sig = extract_signature(&Document::new("p", PAGE));
        assert_eq!(sig.count(MarkerKind::DateInput), 2);
        assert_eq!(sig.count(MarkerKind::SelectControl), 1);
        assert_eq!(sig.count(MarkerKind::ActionButton), 3);
        assert_eq!(sig.count(MarkerKind::CalendarContainer), 2);
    }

    #[test]
    fn test_keywords_and_size() {
        let sig = extract_signature(&Document::new("p", PAGE));
        let keywords: Vec<_> = sig.keyword_set.iter().map(String::as_str).collect();
        assert_eq!(keywords, vec!["boka", "ledigt"]);
        assert_eq!(sig.byte_size, PAGE.len());
        assert_eq!(sig.strategy, StrategyId::PageSignature);
    }

    #[test]
    fn test_markup_only_change_keeps_hash() {
        let a = extract_signature(&Document::new("p", "<p>Boka nu</p>"));
        let b = extract_signature(&Document::new("p", "<div>\n  Boka   nu </div>"));
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.byte_size, b.byte_size);
    }

    #[test]
    fn test_empty_page_still_fingerprints() {
        let sig = extract_signature(&Document::new("p", ""));
        assert_eq!(sig.byte_size, 0);
        assert!(sig.keyword_set.is_empty());
        assert_eq!(sig.element_counts.len(), MarkerKind::ALL.len());
    }
}
