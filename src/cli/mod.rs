//! CLI module for the experiment engine
//!
//! Operator commands over the shared store:
//! - experiment inspection and lifecycle (`list`, `show`, `start`, `reset`, ...)
//! - `apply-delayed`: credit a staged delayed score

pub mod delayed;
pub mod experiments;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// PMP Experiments - A/B testing engine over a shared store
#[derive(Parser)]
#[command(name = "pmp-experiments")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List persisted experiments
    List(experiments::ListArgs),

    /// Show one experiment with its counters
    Show(experiments::ShowArgs),

    /// Save every configured experiment to the store
    Sync,

    /// Start an experiment that was saved without starting
    Start(experiments::NameArgs),

    /// Reset counters and bump the version
    Reset(experiments::NameArgs),

    /// Clear the winner
    Reopen(experiments::NameArgs),

    /// Pin the winning alternative
    Winner(experiments::WinnerArgs),

    /// Delete an experiment and its counters
    Delete(experiments::NameArgs),

    /// Compute win probabilities
    Estimate(experiments::EstimateArgs),

    /// Enable or disable cohorting for new visitors
    Cohorting(experiments::CohortingArgs),

    /// Credit a staged delayed score
    ApplyDelayed(delayed::ApplyDelayedArgs),
}

/// Loads `.env` and the layered configuration, then installs logging.
///
/// Configuration errors abort the command before anything touches the store.
pub(crate) fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);

    Ok(config)
}
