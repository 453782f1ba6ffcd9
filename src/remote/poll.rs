use std::{
    collections::BTreeMap,
    time::Duration,
};

use log::{
    debug, info, warn
};

use super::{
    backend::{
        JobId, JobState, JobStatus,
    },
    Orchestrator,
};
use crate::error::{
    BackendError,
    RemoteJobsFailed,
    TaskError,
};

/// How `wait` spaces out status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    // the first sleep is 2^(initial_exponent + 1) seconds
    pub initial_exponent: u32,

    pub max_sleep: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            initial_exponent: 3,
            max_sleep: Duration::from_secs(600),
        }
    }
}

/// Exponential backoff: `min(2^counter, cap)` seconds, counter bumped before
/// every delay. With the defaults: 16, 32, 64, ..., 512, 600, 600.
#[derive(Debug, Clone)]
pub struct Backoff {
    counter: u32,
    cap: Duration,
}

impl Backoff {
    pub fn new(policy: &PollPolicy) -> Self {
        Backoff {
            counter: policy.initial_exponent,
            cap: policy.max_sleep,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.counter = self.counter.saturating_add(1);
        let secs = 2u64.checked_pow(self.counter).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.cap)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// A submitted job and the last state the backend reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: JobId,

    pub last_known: Option<JobStatus>,

    // number of status updates seen
    pub updates: u32,
}

impl JobHandle {
    pub fn new(job_id: JobId) -> Self {
        JobHandle {
            job_id: job_id,
            last_known: None,
            updates: 0,
        }
    }

    pub fn state(&self) -> Option<JobState> {
        self.last_known.as_ref().map(|s| s.state)
    }
}

impl Orchestrator {
    /// Block until every tracked job is terminal.
    ///
    /// Connectivity errors while polling are retried on the next round. Once
    /// nothing is left to track, all jobs that ended `Failed` are reported in
    /// a single error.
    pub async fn wait(&mut self) -> Result<(), TaskError> {
        let mut backoff = Backoff::new(&self.poll);
        let mut failed = BTreeMap::new();
        while false == self.jobs.is_empty() {
            self.update_jobs(&mut failed).await?;
            if self.jobs.is_empty() {
                break;
            }
            let delay = backoff.next_delay();
            debug!(
                "{} remote jobs pending, next check in {}s.",
                self.jobs.len(),
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }

        if false == failed.is_empty() {
            return Err(RemoteJobsFailed::new(failed).into());
        }
        Ok(())
    }

    // one round of status queries; terminal jobs leave the tracked set
    async fn update_jobs(
        &mut self,
        failed: &mut BTreeMap<JobId, JobStatus>,
    ) -> Result<(), BackendError> {
        let ids: Vec<JobId> = self.jobs.keys().cloned().collect();
        let statuses = match self.backend.get_status(&ids).await {
            Ok(statuses) => statuses,

            Err(e) if e.is_transient() => {
                warn!("Status check failed, will retry: `{e}`");
                return Ok(());
            },

            Err(e) => return Err(e),
        };

        for status in statuses {
            if false == self.jobs.contains_key(&status.id) {
                continue;
            }
            if status.state.is_terminal() {
                info!("Remote job `{}` finished: {:?}", status.id, status.state);
                self.jobs.remove(&status.id);
                if status.state == JobState::Failed {
                    warn!(
                        "Remote job `{}` failed: {}",
                        status.id,
                        status.error_message.as_deref().unwrap_or("no details")
                    );
                    failed.insert(status.id.clone(), status);
                }
            } else if let Some(handle) = self.jobs.get_mut(&status.id) {
                handle.updates += 1;
                handle.last_known = Some(status);
            }
        }
        Ok(())
    }
}
