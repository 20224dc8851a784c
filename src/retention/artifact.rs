/// Backup artifact file names.
///
/// An artifact's identity and age live only in its name:
/// `db_backup_<serviceId>_<YYYY>_<MM>_<DD>_<HHMMSS>.zip`. The executor
/// builds names with [`ArtifactName::file_name`] and retention reads them
/// back with [`ArtifactName::parse`].
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

pub const ARTIFACT_PREFIX: &str = "db_backup";
pub const ARTIFACT_EXTENSION: &str = "zip";

static ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^db_backup_(.+)_(\d{4})_(\d{2})_(\d{2})_(\d{2})(\d{2})(\d{2})\.zip$")
        .expect("artifact pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub service_id: String,
    pub created_at: NaiveDateTime,
}

impl ArtifactName {
    pub fn new(service_id: impl Into<String>, created_at: NaiveDateTime) -> Self {
        Self {
            service_id: service_id.into(),
            created_at,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{ARTIFACT_PREFIX}_{}_{}.{ARTIFACT_EXTENSION}",
            self.service_id,
            self.created_at.format("%Y_%m_%d_%H%M%S")
        )
    }

    /// Parse a file name. Names that don't follow the pattern, or encode an
    /// impossible date or time, yield `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = ARTIFACT_RE.captures(file_name)?;
        let num = |i: usize| caps[i].parse::<u32>().ok();

        let year = caps[2].parse::<i32>().ok()?;
        let date = NaiveDate::from_ymd_opt(year, num(3)?, num(4)?)?;
        let time = NaiveTime::from_hms_opt(num(5)?, num(6)?, num(7)?)?;

        Some(Self {
            service_id: caps[1].to_string(),
            created_at: date.and_time(time),
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.created_at.date()
    }
}
