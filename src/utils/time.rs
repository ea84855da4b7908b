use chrono::{DateTime, Utc};

/// This is the standard way of turning a capture moment into the timestamp part of a file name.
/// Sorting the names lexically sorts the captures chronologically.
pub fn capture_stamp(moment: DateTime<Utc>) -> String {
    moment.format("%Y%m%dT%H%M%S%3fZ").to_string()
}
