use std::{
    env,
    fmt,
};

use async_trait::async_trait;
use chrono::{
    NaiveDate,
    Utc,
};
use log::{
    info, warn
};
use uuid::Uuid;

use crate::error::TaskError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// status of a task run, not to be confused with remote job states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotStarted,

    Running,

    Complete,

    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::NotStarted => "not started",
            Status::Running => "running",
            Status::Complete => "complete",
            Status::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-invocation knobs: which date the run represents and how to treat
/// failures and existing outputs.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub taskdate: NaiveDate,

    // replace existing outputs instead of writing next to them
    pub overwrite: bool,

    // re-raise errors from calc/wait after bookkeeping
    pub raiseonfail: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            taskdate: Utc::now().date_naive(),
            overwrite: false,
            raiseonfail: true,
        }
    }
}

impl TaskOptions {
    /// Options from explicit values, falling back to the `taskdate`,
    /// `overwrite` and `raiseonfail` environment variables.
    pub fn resolve(
        taskdate: Option<&str>,
        overwrite: Option<bool>,
        raiseonfail: Option<bool>,
    ) -> TaskOptions {
        let env_taskdate = env::var("taskdate").ok();
        TaskOptions {
            taskdate: parse_taskdate(taskdate.or(env_taskdate.as_deref())),
            overwrite: overwrite
                .or_else(|| env_flag("overwrite"))
                .unwrap_or(false),
            raiseonfail: raiseonfail
                .or_else(|| env_flag("raiseonfail"))
                .unwrap_or(true),
        }
    }

    pub fn from_env() -> TaskOptions {
        TaskOptions::resolve(None, None, None)
    }

    pub fn with_taskdate(mut self, taskdate: NaiveDate) -> Self {
        self.taskdate = taskdate;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_raiseonfail(mut self, raiseonfail: bool) -> Self {
        self.raiseonfail = raiseonfail;
        self
    }
}

// a missing or malformed date means "today" in UTC
pub fn parse_taskdate(value: Option<&str>) -> NaiveDate {
    value
        .and_then(|v| NaiveDate::parse_from_str(v.trim(), DATE_FORMAT).ok())
        .unwrap_or_else(|| Utc::now().date_naive())
}

fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Bookkeeping shared by every task: identity, options and status.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub id: String,

    pub taskdate: NaiveDate,

    pub overwrite: bool,

    pub raiseonfail: bool,

    status: Status,
}

impl TaskState {
    pub fn new(options: &TaskOptions) -> TaskState {
        TaskState {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            taskdate: options.taskdate,
            overwrite: options.overwrite,
            raiseonfail: options.raiseonfail,
            status: Status::NotStarted,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    pub fn fail(&mut self) {
        self.status = Status::Failed;
    }

    // terminal states are sticky
    fn advance(&mut self, next: Status) {
        match self.status {
            Status::Complete | Status::Failed => {},
            _ => self.status = next,
        }
    }
}

/// The lifecycle engine.
///
/// `run` drives `check_inputs → calc → wait → clean_up`. Implementors provide
/// `calc` and may override the other steps; `clean_up` runs exactly once per
/// `run` no matter how the earlier steps ended.
#[async_trait]
pub trait Task: Send {
    fn state(&self) -> &TaskState;

    fn state_mut(&mut self) -> &mut TaskState;

    fn status(&self) -> Status {
        self.state().status()
    }

    /// Validate preconditions. Returning an error aborts the run; marking the
    /// state failed skips `calc` without raising.
    async fn check_inputs(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    async fn calc(&mut self) -> Result<(), TaskError>;

    async fn wait(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    async fn clean_up(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Run the task to a terminal status.
    ///
    /// Configuration errors from `check_inputs` are always returned. Errors
    /// from `calc`, `wait` and `clean_up` are returned only when
    /// `raiseonfail` is set; otherwise they are logged and the run ends
    /// `Failed`.
    async fn run(&mut self) -> Result<Status, TaskError> {
        self.state_mut().advance(Status::Running);
        info!("Task `{}` started for `{}`.", self.state().id, self.state().taskdate);

        let mut outcome = match self.check_inputs().await {
            Err(e) => {
                self.state_mut().fail();
                Err(e)
            },

            Ok(()) if self.state().is_failed() => {
                warn!("Inputs are not usable, skipping calc.");
                Ok(())
            },

            Ok(()) => {
                let work = match self.calc().await {
                    Ok(()) => self.wait().await,
                    Err(e) => Err(e),
                };
                match work {
                    Ok(()) => Ok(()),

                    Err(e) => {
                        self.state_mut().fail();
                        if true == self.state().raiseonfail {
                            Err(e)
                        } else {
                            warn!("Task failed: `{e}`");
                            Ok(())
                        }
                    }
                }
            },
        };

        match self.clean_up().await {
            Ok(()) => {},

            Err(e) if outcome.is_err() => {
                warn!("Clean up failed after an earlier error: `{e}`");
            },

            Err(e) => {
                self.state_mut().fail();
                if true == self.state().raiseonfail {
                    outcome = Err(e);
                } else {
                    warn!("Clean up failed: `{e}`");
                }
            },
        }

        self.state_mut().advance(Status::Complete);
        info!("status: {}", self.status());
        outcome.map(|_| self.status())
    }
}
