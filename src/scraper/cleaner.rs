use crate::error::StrategyError;
use crate::models::{AvailabilitySnapshot, RawWidgetData};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeSet;

/// Field names that identify the booking-widget object inside page data.
pub const BLOCKED_DAYS_FIELDS: [&str; 3] =
    ["invalidCheckinDays", "invalid_checkin_days", "blockedCheckinDays"];

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse dates: ISO first, then the other layouts seen in widget payloads
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%d/%m/%Y", "%d.%m.%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    None
}

/// Numbers arrive either as JSON numbers or as strings like "07".
fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn window_date(
    year: &Option<Value>,
    month: &Option<Value>,
    day: &Option<Value>,
    names: [&'static str; 3],
) -> Result<NaiveDate, StrategyError> {
    let [year_name, month_name, day_name] = names;
    let y = year.as_ref().ok_or(StrategyError::MissingField(year_name))?;
    let m = month.as_ref().ok_or(StrategyError::MissingField(month_name))?;
    let d = day.as_ref().ok_or(StrategyError::MissingField(day_name))?;

    let y = as_i32(y).ok_or_else(|| StrategyError::shape(year_name, format!("not a year: {y}")))?;
    let m = as_u32(m).ok_or_else(|| StrategyError::shape(month_name, format!("not a month: {m}")))?;
    let d = as_u32(d).ok_or_else(|| StrategyError::shape(day_name, format!("not a day: {d}")))?;

    NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| StrategyError::shape(day_name, format!("{y}-{m}-{d} is not a calendar date")))
}

/// The blocked-day list is either a JSON array or a string holding one.
fn blocked_dates(value: &Value) -> Result<BTreeSet<NaiveDate>, StrategyError> {
    const FIELD: &str = "invalidCheckinDays";

    let decoded;
    let items = match value {
        Value::Array(items) => items,
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s)?;
            decoded
                .as_array()
                .ok_or_else(|| StrategyError::shape(FIELD, "string does not hold a list"))?
        }
        other => return Err(StrategyError::shape(FIELD, format!("expected list, got {other}"))),
    };

    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(parse_date)
                .ok_or_else(|| StrategyError::shape(FIELD, format!("not a date string: {item}")))
        })
        .collect()
}

// ── Widget payload → AvailabilitySnapshot ─────────────────────────────────────

/// Longest booking horizon accepted from a page, in days.
pub const MAX_WINDOW_DAYS: i64 = 5 * 366;

pub fn widget_data_to_snapshot(raw: &RawWidgetData) -> Result<AvailabilitySnapshot, StrategyError> {
    let blocked = raw
        .invalid_checkin_days
        .as_ref()
        .ok_or(StrategyError::MissingField("invalidCheckinDays"))?;
    let blocked = blocked_dates(blocked)?;

    let start = window_date(
        &raw.book_from_year,
        &raw.book_from_month,
        &raw.book_from_day,
        ["bookFromYear", "bookFromMonth", "bookFromDay"],
    )?;
    let end = window_date(
        &raw.book_until_year,
        &raw.book_until_month,
        &raw.book_until_day,
        ["bookUntilYear", "bookUntilMonth", "bookUntilDay"],
    )?;

    let span = (end - start).num_days();
    if span > MAX_WINDOW_DAYS {
        return Err(StrategyError::shape(
            "bookUntilYear",
            format!("booking window {start} → {end} spans {span} days, limit is {MAX_WINDOW_DAYS}"),
        ));
    }

    Ok(AvailabilitySnapshot::new(blocked, start, end)?)
}

/// Depth-first search for the first JSON object carrying a blocked-days field.
pub fn find_widget_object(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => {
            if BLOCKED_DAYS_FIELDS.iter().any(|f| map.contains_key(*f)) {
                return Some(value);
            }
            map.values().find_map(find_widget_object)
        }
        Value::Array(items) => items.iter().find_map(find_widget_object),
        _ => None,
    }
}

/// Validate any parsed JSON value into a snapshot.
pub fn value_to_snapshot(value: &Value) -> Result<AvailabilitySnapshot, StrategyError> {
    let widget = find_widget_object(value).ok_or(StrategyError::MissingField("invalidCheckinDays"))?;

    let mut raw: RawWidgetData = serde_json::from_value(widget.clone())?;
    if raw.invalid_checkin_days.is_none() {
        raw.invalid_checkin_days = BLOCKED_DAYS_FIELDS
            .iter()
            .find_map(|f| widget.get(*f))
            .cloned();
    }
    widget_data_to_snapshot(&raw)
}

/// Undo a second round of entity encoding left after the HTML parser's own pass.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
