//! Delayed score command

use clap::Args;
use tracing::info;

#[derive(Args, Debug)]
pub struct ApplyDelayedArgs {
    /// Score name
    pub score: String,

    /// Label the score was staged under
    pub label: String,
}

/// Credit a staged delayed score to the recorded alternatives
pub async fn run(args: ApplyDelayedArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;
    let service = crate::create_experiment_service(&config).await?;

    let credited = service.apply_delayed_score(&args.score, &args.label).await?;
    info!(score = %args.score, label = %args.label, credited, "Delayed score processed");

    if credited == 0 {
        println!("Nothing staged for {}:{}", args.score, args.label);
    } else {
        println!("Credited {} alternative(s)", credited);
    }

    Ok(())
}
