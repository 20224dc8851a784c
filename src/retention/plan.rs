/// GFS retention planning.
///
/// Pure: given the dated artifacts found on disk, today's date and the
/// policy, decide which artifacts survive. Each artifact falls into the
/// first tier whose window still covers its age:
///
/// ```text
/// age < daily_keep_days          -> daily bucket   (key: date)
/// age < weekly_keep_weeks * 7    -> weekly bucket  (key: ISO year, week)
/// age < monthly_keep_months * 30 -> monthly bucket (key: year, month)
/// otherwise                      -> expired
/// ```
///
/// Only the newest artifact of each bucket is kept.
use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::policy::RetentionPolicy;

/// An artifact found on disk with the timestamp parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedArtifact {
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Day(NaiveDate),
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    /// Older than every configured window.
    Expired,
    /// A newer artifact holds this bucket.
    Superseded(BucketKey),
}

#[derive(Debug, Default)]
pub struct RetentionPlan {
    pub keep: Vec<(DatedArtifact, BucketKey)>,
    pub delete: Vec<(DatedArtifact, DeleteReason)>,
}

/// The bucket an artifact dated `date` belongs to, or `None` if it has
/// outlived every window.
pub fn classify(date: NaiveDate, today: NaiveDate, policy: &RetentionPolicy) -> Option<BucketKey> {
    let age_days = (today - date).num_days();
    let daily = i64::from(policy.daily_keep_days);
    let weekly = i64::from(policy.weekly_keep_weeks) * 7;
    let monthly = i64::from(policy.monthly_keep_months) * 30;

    if daily > 0 && age_days < daily {
        return Some(BucketKey::Day(date));
    }
    if weekly > 0 && age_days < weekly {
        let iso = date.iso_week();
        return Some(BucketKey::Week {
            year: iso.year(),
            week: iso.week(),
        });
    }
    if monthly > 0 && age_days < monthly {
        return Some(BucketKey::Month {
            year: date.year(),
            month: date.month(),
        });
    }
    None
}

pub fn plan(artifacts: Vec<DatedArtifact>, today: NaiveDate, policy: &RetentionPolicy) -> RetentionPlan {
    let mut buckets: BTreeMap<BucketKey, Vec<DatedArtifact>> = BTreeMap::new();
    let mut result = RetentionPlan::default();

    for artifact in artifacts {
        match classify(artifact.created_at.date(), today, policy) {
            Some(key) => buckets.entry(key).or_default().push(artifact),
            None => result.delete.push((artifact, DeleteReason::Expired)),
        }
    }

    for (key, mut members) in buckets {
        // Path breaks ties between identical timestamps.
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.path.cmp(&b.path)));
        let Some(newest) = members.pop() else {
            continue;
        };
        result
            .delete
            .extend(members.into_iter().map(|a| (a, DeleteReason::Superseded(key))));
        result.keep.push((newest, key));
    }

    result
}
