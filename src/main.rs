use clap::Parser;
use pmp_experiments::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::List(args) => cli::experiments::list(args).await,
        Command::Show(args) => cli::experiments::show(args).await,
        Command::Sync => cli::experiments::sync().await,
        Command::Start(args) => cli::experiments::start(args).await,
        Command::Reset(args) => cli::experiments::reset(args).await,
        Command::Reopen(args) => cli::experiments::reopen(args).await,
        Command::Winner(args) => cli::experiments::winner(args).await,
        Command::Delete(args) => cli::experiments::delete(args).await,
        Command::Estimate(args) => cli::experiments::estimate(args).await,
        Command::Cohorting(args) => cli::experiments::cohorting(args).await,
        Command::ApplyDelayed(args) => cli::delayed::run(args).await,
    }
}
