#![doc = include_str!("../README.md")]

use std::{
    env,
    fs,
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use clap::{
    Parser, Subcommand
};
use log::{
    info, warn
};
use tracing_subscriber::{
    filter::LevelFilter,
    EnvFilter,
};

use geotask::{
    inputs::parse_inputs,
    remote::{
        rest::RestBackend,
        Orchestrator,
    },
    Settings,
    TaskOptions,
};

// CLI
#[derive(Parser, Debug)]
#[command(name = "geotask")]
#[command(version = "0.1")]
#[command(about = "Operate on date-parameterized geospatial tasks and their \
                   remote assets.",
          long_about = None)
]
struct Cli {
    /// Config file, defaults to ~/.geotask/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Task date as YYYY-MM-DD, defaults to today
    #[arg(short, long)]
    taskdate: Option<String>,

    #[arg(long)]
    overwrite: Option<bool>,

    #[arg(long)]
    raiseonfail: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that declared inputs exist and are fresh for the task date
    Check {
        /// TOML file with an [inputs.<name>] table per input
        #[arg(short, long)]
        inputs: PathBuf,
    },

    /// Block until remote jobs finish
    Wait {
        #[arg(short, long, required = true)]
        job_id: Vec<String>,
    },

    /// Remove an asset below the root namespace
    Rm {
        asset: String,

        #[arg(long, action)]
        dry_run: bool,
    },

    /// Rename an asset below the root namespace
    Mv {
        old: String,

        new: String,
    },
}

// run progress and the final task status show at info without RUST_LOG
fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&env::var("RUST_LOG").unwrap_or_default()))
        .try_init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let options = TaskOptions::resolve(
        cli.taskdate.as_deref(),
        cli.overwrite,
        cli.raiseonfail,
    );
    let backend = Arc::new(RestBackend::from_config(&settings.backend)?);
    let mut remote = Orchestrator::from_settings(backend, &settings, &options)?;
    info!("Root namespace: `{}`, task date: `{}`", remote.root_dir(), remote.taskdate());

    match cli.command {
        Commands::Check { inputs } => {
            let text = fs::read_to_string(&inputs)
                .with_context(|| format!("cannot read `{}`", inputs.display()))?;
            let inputs = parse_inputs(&text)
                .with_context(|| format!("cannot parse `{}`", inputs.display()))?;
            remote = remote.with_inputs(inputs);
            let failures = remote.check_inputs().await?;
            if false == failures.is_empty() {
                for failure in failures {
                    println!("{}: {failure}", failure.input);
                }
                anyhow::bail!("{} inputs are not usable", failures.len());
            }
            println!("All {} inputs are usable.", remote.inputs().len());
        },

        Commands::Wait { job_id } => {
            for id in job_id {
                remote.track_job(id);
            }
            remote.wait().await?;
            println!("All jobs finished.");
        },

        Commands::Rm { asset, dry_run } => {
            if false == remote.remove_asset(&asset, dry_run).await? {
                warn!("Nothing to remove.");
            }
        },

        Commands::Mv { old, new } => {
            if false == remote.move_asset(&old, &new).await? {
                anyhow::bail!("could not move `{old}` to `{new}`");
            }
        },
    }
    Ok(())
}
