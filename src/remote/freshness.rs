//! Input validation against the remote namespace.
//!
//! Every input with a remote path must exist, and time-varying inputs must
//! have a candidate asset that is not newer than the task date and not older
//! than its `maxage`.

use std::{
    fmt,
    sync::LazyLock,
};

use chrono::{
    DateTime,
    Datelike,
    Days,
    NaiveDate,
    NaiveTime,
};
use log::{
    info, warn
};
use regex::Regex;

use super::{
    backend::{
        AssetInfo, AssetKind,
    },
    Orchestrator,
};
use crate::{
    error::BackendError,
    inputs::{
        InputDescriptor, RemoteType,
    },
    task::DATE_FORMAT,
};

// `..._2024-01-10` or `..._2024-01-10-2`
static DATED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})(-\d+)?").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputProblem {
    MissingType,

    NotFound,

    NoTimestamp,

    FromTheFuture,

    TooOld {
        age: u32,
        maxage: u32,
    },
}

/// One input that cannot be used for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFailure {
    pub input: String,

    pub path: String,

    pub problem: InputProblem,
}

impl fmt::Display for InputFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = &self.path;
        match &self.problem {
            InputProblem::MissingType => write!(f, "Missing or invalid remote_type for {path}"),
            InputProblem::NotFound => write!(f, "{path} does not exist"),
            InputProblem::NoTimestamp => write!(f, "Asset {path} has no timestamp on or before the task date"),
            InputProblem::FromTheFuture => write!(f, "Asset {path} has a date more recent than the task date"),
            InputProblem::TooOld { age, maxage } => {
                write!(f, "Asset {path} is {age} years old (maxage: {maxage})")
            },
        }
    }
}

pub fn date_to_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

pub fn date_from_millis(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// Whole calendar years from `candidate` to `taskdate`; `None` if the
/// candidate is dated after the task date.
pub fn asset_age_years(taskdate: NaiveDate, candidate: NaiveDate) -> Option<u32> {
    taskdate.years_since(candidate)
}

impl Orchestrator {
    // timestamps strictly before the start of the day after taskdate
    fn cutoff_millis(&self) -> i64 {
        let next_day = self.taskdate
            .checked_add_days(Days::new(1))
            .unwrap_or(self.taskdate);
        date_to_millis(next_day)
    }

    /// Validate every input, recording all failures rather than stopping at
    /// the first one. Returns the failures found.
    pub async fn check_inputs(&mut self) -> Result<&[InputFailure], BackendError> {
        let mut failures = vec![];
        for (name, input) in &self.inputs {
            let Some(path) = input.remote_path.as_deref() else {
                continue;
            };
            if let Some(problem) = self.check_input(path, input).await? {
                let failure = InputFailure {
                    input: name.clone(),
                    path: path.to_string(),
                    problem: problem,
                };
                warn!("{failure}");
                failures.push(failure);
            }
        }
        if failures.is_empty() {
            info!("All {} inputs are usable for `{}`.", self.inputs.len(), self.taskdate);
        }
        self.input_failures = failures;
        Ok(&self.input_failures)
    }

    /// Record a failure found by task-specific validation.
    pub fn record_input_failure(&mut self, failure: InputFailure) {
        warn!("{failure}");
        self.input_failures.push(failure);
    }

    async fn check_input(
        &self,
        path: &str,
        input: &InputDescriptor,
    ) -> Result<Option<InputProblem>, BackendError> {
        let Some(remote_type) = input.remote_type else {
            return Ok(Some(InputProblem::MissingType));
        };
        if false == self.backend.exists(path).await? {
            return Ok(Some(InputProblem::NotFound));
        }

        // existence is all we can check for these
        let timestamp = match remote_type {
            _ if input.is_static => return Ok(None),
            RemoteType::FeatureCollection | RemoteType::Directory => return Ok(None),
            RemoteType::Image => self.backend
                .get_asset(path)
                .await?
                .and_then(|a| a.time_start),
            RemoteType::ImageCollection => self
                .most_recent_image(path)
                .await?
                .and_then(|a| a.time_start),
        };

        let Some(candidate) = timestamp.and_then(date_from_millis) else {
            return Ok(Some(InputProblem::NoTimestamp));
        };
        match asset_age_years(self.taskdate, candidate) {
            None => Ok(Some(InputProblem::FromTheFuture)),

            Some(age) => match input.maxage {
                Some(maxage) if age > maxage => Ok(Some(InputProblem::TooOld { age, maxage })),
                _ => Ok(None),
            },
        }
    }

    /// The image in a collection with the greatest timestamp that still
    /// falls on or before the task date.
    pub async fn most_recent_image(&self, collection: &str) -> Result<Option<AssetInfo>, BackendError> {
        let cutoff = self.cutoff_millis();
        let images = self.backend.list_assets(collection).await?;
        Ok(images
            .into_iter()
            .filter(|a| a.kind == AssetKind::Image)
            .filter(|a| a.time_start.map_or(false, |t| t < cutoff))
            .max_by_key(|a| a.time_start))
    }

    /// Images of the most recent complete calendar year before the task
    /// date, searching back at most `maxage` years (at least one).
    ///
    /// Returns the images together with the first day of their year.
    pub async fn most_recent_fullyear_collection(
        &self,
        collection: &str,
        maxage: u32,
    ) -> Result<Option<(Vec<AssetInfo>, NaiveDate)>, BackendError> {
        let images: Vec<AssetInfo> = self.backend
            .list_assets(collection)
            .await?
            .into_iter()
            .filter(|a| a.kind == AssetKind::Image)
            .collect();
        let filterdate = self.taskdate
            .checked_add_days(Days::new(1))
            .unwrap_or(self.taskdate);

        let mut year = filterdate.year() - 1;
        for _ in 0..maxage.max(1) {
            let (Some(start), Some(end)) = (
                NaiveDate::from_ymd_opt(year, 1, 1),
                NaiveDate::from_ymd_opt(year + 1, 1, 1),
            ) else {
                break;
            };
            let (start_ms, end_ms) = (date_to_millis(start), date_to_millis(end));
            let in_year: Vec<AssetInfo> = images
                .iter()
                .filter(|a| a.time_start.map_or(false, |t| t >= start_ms && t < end_ms))
                .cloned()
                .collect();
            if false == in_year.is_empty() {
                return Ok(Some((in_year, start)));
            }
            year -= 1;
        }
        Ok(None)
    }

    /// The table in `dir` whose id carries the latest `YYYY-MM-DD` that is
    /// not after the task date. Ties go to the one listed last.
    pub async fn most_recent_feature_collection(
        &self,
        dir: &str,
    ) -> Result<Option<(String, NaiveDate)>, BackendError> {
        if false == self.backend.exists(dir).await? {
            return Ok(None);
        }
        let mut most_recent: Option<(String, NaiveDate)> = None;
        for asset in self.backend.list_assets(dir).await? {
            if asset.kind != AssetKind::Table {
                continue;
            }
            let Some(date) = DATED_NAME
                .captures(&asset.id)
                .and_then(|c| NaiveDate::parse_from_str(&c[1], DATE_FORMAT).ok())
            else {
                continue;
            };
            if date > self.taskdate {
                continue;
            }
            let newer = most_recent.as_ref().map_or(true, |(_, best)| date >= *best);
            if newer {
                most_recent = Some((asset.id, date));
            }
        }
        Ok(most_recent)
    }
}
