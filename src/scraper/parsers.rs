use scraper::{Html, Selector};
use tracing::warn;

// ── Selectors ─────────────────────────────────────────────────────────────────

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!("selector {:?} rejected: {:?}", css, e);
            None
        }
    }
}

/// Attribute carrying the widget's server-side page data.
pub const PAGE_DATA_SELECTOR: &str = "div#pageServerData";
pub const PAGE_DATA_ATTR: &str = "data-page-server-data";

/// Other data attributes the widget has been seen to stash JSON in.
const BOOKING_DATA_ATTRS: [&str; 3] = ["data-booking", "data-calendar", "data-availability"];

/// Shorter attribute values are flags or ids, not JSON payloads.
const MIN_PAYLOAD_LEN: usize = 50;

// ── Scripts ───────────────────────────────────────────────────────────────────

pub fn script_bodies(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Some(sel) = selector("script") else { return vec![] };

    doc.select(&sel)
        .map(|s| s.text().collect::<String>())
        .filter(|body| !body.trim().is_empty())
        .collect()
}

// ── Data attributes ───────────────────────────────────────────────────────────

/// Attribute payloads in priority order: the page-data div first, then any
/// element with a booking-related data attribute long enough to be JSON.
pub fn embedded_payloads(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut payloads = Vec::new();

    if let Some(sel) = selector(PAGE_DATA_SELECTOR) {
        payloads.extend(
            doc.select(&sel)
                .filter_map(|el| el.value().attr(PAGE_DATA_ATTR))
                .map(str::to_string),
        );
    }

    for attr in BOOKING_DATA_ATTRS {
        let Some(sel) = selector(&format!("[{attr}]")) else { continue };
        payloads.extend(
            doc.select(&sel)
                .filter_map(|el| el.value().attr(attr))
                .filter(|v| v.len() > MIN_PAYLOAD_LEN)
                .map(str::to_string),
        );
    }

    payloads
}

// ── Brace spans ───────────────────────────────────────────────────────────────

/// Index just past the `}` matching the `{` at `open`, skipping quoted strings.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Balanced `{...}` spans enclosing byte offset `pos`, innermost first.
pub fn enclosing_objects(text: &str, pos: usize) -> Vec<&str> {
    text[..pos.min(text.len())]
        .match_indices('{')
        .rev()
        .filter_map(|(open, _)| {
            let close = matching_close(text, open)?;
            (close > pos).then(|| &text[open..close])
        })
        .collect()
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// Words suggesting a booking surface is present on the page.
pub const BOOKING_INDICATORS: [&str; 5] = ["boka", "booking", "tillgänglig", "available", "calendar"];

#[derive(Debug, Default)]
pub struct PageDiagnostics {
    pub title: Option<String>,
    pub div_count: usize,
    pub script_count: usize,
    pub indicators: Vec<&'static str>,
    pub mentions_provider: bool,
}

pub fn page_diagnostics(html: &str) -> PageDiagnostics {
    let doc = Html::parse_document(html);
    let count = |css: &str| selector(css).map(|s| doc.select(&s).count()).unwrap_or(0);

    let title = selector("title")
        .and_then(|s| doc.select(&s).next())
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let text = doc.root_element().text().collect::<String>().to_lowercase();

    PageDiagnostics {
        title,
        div_count: count("div"),
        script_count: count("script"),
        indicators: BOOKING_INDICATORS
            .iter()
            .copied()
            .filter(|w| text.contains(w))
            .collect(),
        mentions_provider: html.to_lowercase().contains("sirvoy"),
    }
}
