use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use super::{
    backend::RemoteBackend,
    Orchestrator,
};
use crate::{
    config::Settings,
    error::{
        ConfigError,
        TaskError,
    },
    geo::{
        self,
        GeoConfig,
    },
    inputs::InputSpecs,
    task::{
        Task, TaskOptions, TaskState,
    },
};

/// The job-specific half of a remote task.
///
/// Implementors declare their inputs and submit remote jobs from `calc`
/// through the orchestrator; waiting, input validation and overwrite
/// bookkeeping are handled by [`EeTask`].
#[async_trait]
pub trait RemoteWork: Send + Sync + Sized {
    /// Inputs shared by a family of tasks, e.g. country boundaries every
    /// driver of an index needs. Entries in `inputs` win on a name clash.
    fn common_inputs(&self) -> InputSpecs<Self> {
        InputSpecs::new()
    }

    /// Input declarations, resolved once against `self` when the task is built.
    fn inputs(&self) -> InputSpecs<Self> {
        InputSpecs::new()
    }

    fn geo(&self) -> GeoConfig {
        GeoConfig::default()
    }

    /// Extra validation after the generic input checks. Record problems with
    /// `Orchestrator::record_input_failure` to skip calc.
    async fn check_inputs(&mut self, _remote: &mut Orchestrator) -> Result<(), TaskError> {
        Ok(())
    }

    async fn calc(&mut self, remote: &mut Orchestrator) -> Result<(), TaskError>;
}

/// A lifecycle task whose work runs on the remote backend.
pub struct EeTask<W> {
    state: TaskState,
    pub remote: Orchestrator,
    pub work: W,
}

impl<W: RemoteWork> EeTask<W> {
    /// Build a task writing under `root_dir`.
    pub fn new(
        work: W,
        backend: Arc<dyn RemoteBackend>,
        root_dir: &str,
        options: &TaskOptions,
    ) -> Result<Self, ConfigError> {
        let remote = Orchestrator::new(backend, root_dir, options)?;
        Ok(Self::assemble(work, remote, options))
    }

    pub fn from_settings(
        work: W,
        backend: Arc<dyn RemoteBackend>,
        settings: &Settings,
        options: &TaskOptions,
    ) -> Result<Self, ConfigError> {
        let remote = Orchestrator::from_settings(backend, settings, options)?;
        Ok(Self::assemble(work, remote, options))
    }

    fn assemble(work: W, remote: Orchestrator, options: &TaskOptions) -> Self {
        let mut inputs = work.common_inputs().resolve(&work);
        inputs.extend(work.inputs().resolve(&work));
        let remote = remote
            .with_geo(work.geo())
            .with_inputs(inputs);
        EeTask {
            state: TaskState::new(options),
            remote: remote,
            work: work,
        }
    }
}

#[async_trait]
impl<W: RemoteWork> Task for EeTask<W> {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    async fn check_inputs(&mut self) -> Result<(), TaskError> {
        geo::guard(&self.remote.geo, &mut self.state)?;

        self.remote.check_inputs().await?;
        self.work.check_inputs(&mut self.remote).await?;
        if false == self.remote.input_failures().is_empty() {
            info!(
                "{} inputs are not usable for `{}`.",
                self.remote.input_failures().len(),
                self.state.taskdate
            );
            self.state.fail();
        }
        Ok(())
    }

    async fn calc(&mut self) -> Result<(), TaskError> {
        self.work.calc(&mut self.remote).await
    }

    async fn wait(&mut self) -> Result<(), TaskError> {
        self.remote.wait().await
    }

    /// Promote overwritten outputs, but only when the run succeeded; after a
    /// failure the previous assets stay untouched.
    async fn clean_up(&mut self) -> Result<(), TaskError> {
        if self.state.is_failed() || false == self.remote.overwrite() {
            return Ok(());
        }
        self.remote.commit_transactions().await?;
        Ok(())
    }
}
