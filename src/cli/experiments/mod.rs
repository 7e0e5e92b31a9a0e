//! Experiment inspection and lifecycle commands

use clap::Args;
use tracing::info;

use crate::infrastructure::engine::{Experiment, ExperimentSummary, WinEstimate};
use crate::infrastructure::services::ExperimentService;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Experiment name
    pub name: String,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct NameArgs {
    /// Experiment name
    pub name: String,
}

#[derive(Args, Debug)]
pub struct WinnerArgs {
    /// Experiment name
    pub name: String,

    /// Alternative to pin
    pub alternative: String,
}

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Experiment name
    pub name: String,

    /// Recompute even if the last estimate is recent
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct CohortingArgs {
    /// Experiment name
    pub name: String,

    /// Stop enrolling new visitors
    #[arg(long, conflicts_with = "enable", required_unless_present = "enable")]
    pub disable: bool,

    /// Resume enrolling new visitors
    #[arg(long)]
    pub enable: bool,
}

async fn service() -> anyhow::Result<ExperimentService> {
    let config = super::bootstrap()?;
    Ok(crate::create_experiment_service(&config).await?)
}

async fn experiment(service: &ExperimentService, name: &str) -> anyhow::Result<Experiment> {
    Ok(service.catalog().find_or_initialize(name).await?)
}

pub async fn list(args: ListArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiments = service.catalog().all().await?;

    let mut summaries = Vec::with_capacity(experiments.len());
    for experiment in &experiments {
        summaries.push(ExperimentSummary::load(experiment).await?);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No experiments");
    }

    for summary in &summaries {
        println!(
            "{:<32} v{:<4} participants={:<8} completed={:<8} winner={}",
            summary.name,
            summary.version,
            summary.total_participants(),
            summary.total_completions(),
            summary.winner.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

pub async fn show(args: ShowArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;
    let summary = ExperimentSummary::load(&experiment).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} (version {}, {})", summary.name, summary.version, summary.algorithm);
    match summary.start_time {
        Some(started) => println!("  started:  {}", started.to_rfc3339()),
        None => println!("  started:  not started"),
    }
    println!("  winner:   {}", summary.winner.as_deref().unwrap_or("-"));
    println!("  cohorting: {}", if summary.cohorting_disabled { "disabled" } else { "enabled" });

    for alt in &summary.alternatives {
        println!(
            "  {:<24} weight={:.2} participants={:<8} completed={:<8} rate={:.4}{}",
            alt.name,
            alt.weight,
            alt.participant_count,
            alt.completed_count,
            alt.conversion_rate,
            if alt.control { " (control)" } else { "" },
        );

        for (goal, count) in &alt.goal_completions {
            println!("      goal {:<20} completed={}", goal, count);
        }
        for (score, total) in &alt.scores {
            println!("      score {:<19} total={}", score, total);
        }
    }

    Ok(())
}

pub async fn sync() -> anyhow::Result<()> {
    let service = service().await?;
    let saved = service.catalog().create_configured().await?;

    info!(count = saved.len(), "Configured experiments saved");
    for experiment in &saved {
        println!("saved {}", experiment.name());
    }

    Ok(())
}

pub async fn start(args: NameArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;

    experiment.start().await?;
    info!(experiment = %args.name, "Experiment started");

    Ok(())
}

pub async fn reset(args: NameArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;

    let version = experiment.reset().await?;
    info!(experiment = %args.name, version, "Experiment reset");
    println!("{} is now at version {}", args.name, version);

    Ok(())
}

pub async fn reopen(args: NameArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;

    experiment.reset_winner().await?;
    info!(experiment = %args.name, "Experiment reopened");

    Ok(())
}

pub async fn winner(args: WinnerArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;

    experiment.set_winner(&args.alternative).await?;
    info!(experiment = %args.name, alternative = %args.alternative, "Winner set");

    Ok(())
}

pub async fn delete(args: NameArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;

    let version = experiment.delete().await?;
    info!(experiment = %args.name, version, "Experiment deleted");

    Ok(())
}

pub async fn estimate(args: EstimateArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;

    let estimates = if args.force {
        Some(experiment.estimate_winning_alternatives().await?)
    } else {
        experiment.calc_winning_alternatives().await?
    };

    match estimates {
        Some(estimates) => print_estimates(&estimates),
        None => println!("Estimate for {} is still fresh; use --force to recompute", args.name),
    }

    Ok(())
}

fn print_estimates(estimates: &[WinEstimate]) {
    for estimate in estimates {
        println!("{}", estimate.goal.as_deref().unwrap_or("overall"));

        for (alternative, probability) in &estimate.probabilities {
            println!("  {:<24} {:>6.2}%", alternative, probability * 100.0);
        }
    }
}

pub async fn cohorting(args: CohortingArgs) -> anyhow::Result<()> {
    let service = service().await?;
    let experiment = experiment(&service, &args.name).await?;

    if args.enable {
        experiment.enable_cohorting().await?;
    } else {
        experiment.disable_cohorting().await?;
    }

    info!(experiment = %args.name, enabled = args.enable, "Cohorting updated");

    Ok(())
}
