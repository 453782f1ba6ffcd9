//! Recurring, date-parameterized geospatial tasks executed on a remote
//! compute backend.
//!
//! A task runs through `check_inputs → calc → wait → clean_up`:
//! inputs are checked for presence and freshness relative to the task date,
//! `calc` submits remote jobs, `wait` polls them with exponential backoff and
//! `clean_up` promotes overwritten outputs once everything succeeded.

pub mod config;
pub mod error;
pub mod geo;
pub mod inputs;
pub mod remote;
pub mod task;
pub mod transfer;

pub use config::Settings;
pub use error::{
    BackendError, ConfigError, RemoteJobsFailed, TaskError, TransferError,
};
pub use geo::{
    GeoConfig, GeoTask, GeoWork,
};
pub use inputs::{
    InputDescriptor, InputSpec, InputSpecs, Inputs, RemoteType,
};
pub use remote::{
    EeTask, Orchestrator, RemoteBackend, RemoteWork,
};
pub use task::{
    Status, Task, TaskOptions, TaskState,
};
