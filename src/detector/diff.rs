//! Newly available dates between two polls.

use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Dates present in `current` that were not available in `previous`.
pub fn newly_available(previous: &BTreeSet<NaiveDate>, current: &BTreeSet<NaiveDate>) -> BTreeSet<NaiveDate> {
    current.difference(previous).copied().collect()
}
