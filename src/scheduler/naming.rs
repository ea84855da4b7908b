use chrono::{DateTime, Utc};

use crate::utils::time::capture_stamp;

pub const ARTIFACT_PREFIX: &str = "screenshot";

/// Hands out `screenshot_<timestamp>.<ext>` names. Stamps have millisecond resolution and are
/// strictly increasing: a moment that isn't later than the previously issued stamp is pushed one
/// millisecond past it, so rapid ticks or a clock stepping backwards never reuse a name.
pub struct ArtifactNamer {
    extension: String,
    last_issued_ms: Option<i64>,
}

impl ArtifactNamer {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            last_issued_ms: None,
        }
    }

    pub fn next_name(&mut self, moment: DateTime<Utc>) -> String {
        let mut millis = moment.timestamp_millis();
        if let Some(last) = self.last_issued_ms {
            millis = millis.max(last + 1);
        }
        self.last_issued_ms = Some(millis);

        let stamp = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(moment);
        format!("{ARTIFACT_PREFIX}_{}.{}", capture_stamp(stamp), self.extension)
    }
}
