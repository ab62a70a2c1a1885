// Sequence allocation for scoped series: member numbers, financial-account
// ordinals, and daily document numbers. The rule everywhere is slot reuse:
// a freed number becomes available again before the series grows.

use chrono::NaiveDate;

use crate::models::{DocumentType, ProviderType};

/// How many times a caller recomputes a gap and re-inserts after losing a
/// write-time uniqueness race before giving up with `AllocationContended`.
pub const ALLOC_MAX_RETRIES: u32 = 3;

/// Lowest positive integer not present in `used`.
///
/// Sorts a copy and binary-searches for the first index where
/// `seq[i] != i + 1` (the first gap); when the series is dense the next
/// value is `len + 1`.
pub fn next_free_number(used: &[u32]) -> u32 {
    let mut seq = used.to_vec();
    seq.sort_unstable();
    seq.dedup();

    let (mut lo, mut hi) = (0usize, seq.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        if seq[mid] == mid as u32 + 1 {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo as u32 + 1
}

/// `<2-letter prefix><yyyymmdd><3-digit ordinal>` for codes minted from the
/// per-day series.
pub fn format_daily_code(doc_type: DocumentType, day: NaiveDate, ordinal: u32) -> String {
    format!("{}{}{:03}", doc_type.prefix(), day.format("%Y%m%d"), ordinal)
}

/// `<2-letter prefix><11-digit number>` for manually assigned numbers.
pub fn format_explicit_code(doc_type: DocumentType, number: u64) -> String {
    format!("{}{:011}", doc_type.prefix(), number)
}

/// Ordinal portion of a daily document code.
pub fn daily_ordinal(code: &str) -> Option<u32> {
    code.get(10..13)?.parse().ok()
}

/// `<3-letter prefix><3-digit ordinal>` for financial-account codes.
pub fn format_account_code(provider_type: ProviderType, ordinal: u32) -> String {
    format!("{}{:03}", provider_type.code_prefix(), ordinal)
}

/// Ordinal portion of a financial-account shortened code.
pub fn account_ordinal(code: &str) -> Option<u32> {
    code.get(3..6)?.parse().ok()
}
