// Mnema Engine — Timestamp helpers
//
// All timestamps in both stores are ISO-8601 UTC strings with millisecond
// precision. The format is fixed-width, so equality and ordering are plain
// lexicographic string comparisons everywhere (indexes included).

use chrono::{DateTime, Utc};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Current instant as a canonical ISO-8601 UTC string.
pub fn now_iso() -> String {
    Utc::now().format(ISO_FORMAT).to_string()
}

/// Render an arbitrary instant in the canonical format.
pub fn to_iso(instant: DateTime<Utc>) -> String {
    instant.format(ISO_FORMAT).to_string()
}

/// Fractional hours elapsed since `timestamp`, clamped at 0 for timestamps
/// in the future. Unparseable input is treated as 0 hours old so a damaged
/// row scores as fresh rather than vanishing from recall.
pub fn hours_since(timestamp: &str) -> f64 {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(parsed) => {
            let elapsed_ms = (Utc::now() - parsed.with_timezone(&Utc)).num_milliseconds();
            (elapsed_ms as f64 / 3_600_000.0).max(0.0)
        }
        Err(_) => 0.0,
    }
}
