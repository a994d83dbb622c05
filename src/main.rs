use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use entitlements::{
    config::Config,
    jobs::{DailyScheduler, ImmediateScheduler, Scheduler},
    models::entitlement::AdminGrantRequest,
    AppState,
};
use migration::{Migrator, MigratorTrait};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

#[derive(Parser, Debug)]
#[command(name = "entitlements", about = "Subscription and entitlement reconciliation worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the nightly reconciliation on its daily schedule
    Serve,
    /// Run one reconciliation sweep now and exit
    Run {
        #[arg(value_enum, default_value_t = JobKind::All)]
        job: JobKind,
    },
    /// Grant an entitlement without a receipt
    Grant {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        product: String,
        #[arg(long)]
        transaction: String,
    },
    /// Reset memberships left behind by expired purchases or partial writes
    Repair,
    /// Apply pending database migrations
    Migrate,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum JobKind {
    Iap,
    Membership,
    All,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,entitlements=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("loading config.toml")?;
    init_tracing(config.logging.json);

    tracing::info!("Starting entitlement reconciliation worker");

    let state = AppState::new(config).await?;

    match cli.command {
        Command::Serve => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received, stopping after the current run");
                    let _ = shutdown_tx.send(true);
                }
            });

            let scheduler =
                DailyScheduler::from_config(&state.config.schedule)?.with_shutdown(shutdown_rx);
            scheduler.run(&state.nightly_job()).await?;
        }
        Command::Run { job } => match job {
            JobKind::Iap => ImmediateScheduler.run(&state.iap_job()).await?,
            JobKind::Membership => ImmediateScheduler.run(&state.membership_job()).await?,
            JobKind::All => ImmediateScheduler.run(&state.nightly_job()).await?,
        },
        Command::Grant {
            user,
            product,
            transaction,
        } => {
            let request = AdminGrantRequest {
                user_id: user,
                product_id: product,
                transaction_id: transaction,
            };
            request
                .validate()
                .map_err(|e| anyhow::anyhow!("Validation error: {}", e))?;

            let purchase = state
                .subscription_manager
                .create_subscription_without_validation(
                    request.user_id,
                    &request.product_id,
                    &request.transaction_id,
                )
                .await?;

            tracing::info!(purchase_id = %purchase.id, "Granted entitlement");
        }
        Command::Repair => {
            state.subscription_manager.repair_split_states().await?;
        }
        Command::Migrate => {
            Migrator::up(&state.db, None).await?;
            tracing::info!("Migrations applied");
        }
    }

    Ok(())
}
