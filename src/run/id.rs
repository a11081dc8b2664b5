use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{OntoKgError, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const SUFFIX_LEN: usize = 6;

/// Run identifier: `YYYYmmdd_HHMMSS_xxxxxx`.
///
/// The UTC timestamp prefix makes ids sort by creation time; the random suffix keeps
/// runs created in the same second apart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(SUFFIX_LEN).collect();
        RunId(format!("{}_{}", time.format(TIMESTAMP_FORMAT), suffix))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || OntoKgError::InvalidInput(format!("not a run id: '{}'", text));
        let (stamp, suffix) = text.rsplit_once('_').ok_or_else(invalid)?;
        if suffix.len() != SUFFIX_LEN
            || !suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(invalid());
        }
        chrono::NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
        Ok(RunId(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_in_the_same_second_differ() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let a = RunId::at(now);
        let b = RunId::at(now);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("20240301_120000_"));
    }

    #[test]
    fn ids_sort_by_time() {
        let earlier = RunId::at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let later = RunId::at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 1).unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn parse_round_trips_and_rejects_garbage() {
        let id = RunId::generate();
        assert_eq!(RunId::parse(id.as_str()).unwrap(), id);
        assert!(RunId::parse("latest").is_err());
        assert!(RunId::parse("20240301_120000_ABCDEF").is_err());
        assert!(RunId::parse("2024_120000_abcdef").is_err());
    }
}
