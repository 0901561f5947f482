use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trainingground_qengine::{config::Config, services::EngineState};

#[derive(Parser)]
#[command(name = "trainingground-qengine", about = "Regrade stored question usages")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay every attempt of the given usages against current question definitions
    Regrade {
        #[arg(required = true)]
        usage_ids: Vec<String>,
    },
    /// Change the max mark of one slot without replaying history
    SetMaxMark {
        slot: u32,
        #[arg(allow_negative_numbers = true)]
        mark: f64,
        #[arg(required = true)]
        usage_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainingground_qengine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load()?;
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
    let state = EngineState::new(config, mongo_client).await?;
    let service = state.regrade_service();

    match cli.command {
        Command::Regrade { usage_ids } => {
            let report = service.regrade_usages(&usage_ids).await;
            for usage in &report.regraded {
                for slot in &usage.slots {
                    println!(
                        "{} slot {}: {} {:?} -> {} {:?}",
                        usage.usage_id,
                        slot.slot,
                        slot.old_state,
                        slot.old_mark,
                        slot.new_state,
                        slot.new_mark
                    );
                }
            }
            for (usage_id, error) in &report.failed {
                eprintln!("{}: {}", usage_id, error);
            }
            if !report.failed.is_empty() {
                anyhow::bail!("{} usages failed to regrade", report.failed.len());
            }
        }
        Command::SetMaxMark {
            slot,
            mark,
            usage_ids,
        } => {
            let changed = service.set_max_mark(&usage_ids, slot, mark).await?;
            println!("Updated {} attempts", changed);
        }
    }

    Ok(())
}
