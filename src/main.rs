//! # Rastro — simulated shipment tracking
//!
//! Creates tracking timelines for confirmed orders, answers public status lookups, and runs
//! the notification dispatch workers.
//!
//! Usage:
//!   rastro init --email loja@example.com --plan starter   # Config, schema, system models, owner
//!   rastro order --owner <id> --model <id> --name Ana --city Recife --state PE --email ana@example.com
//!   rastro status BR7Q2K9XH1M                             # Public lookup (counts a view)
//!   rastro worker                                         # Dispatch notifications until Ctrl-C
//!   rastro failed --owner <id>                            # Notifications that gave up

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rastro_channels::ChannelRouter;
use rastro_core::RastroConfig;
use rastro_core::types::Instant;
use rastro_platform::{OrderConfirmed, Plans, PlatformDb, QuotaLedger, TrackingService};
use rastro_scheduler::{DispatcherPool, WorkerSettings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rastro", version, about = "📦 Rastro — tracking timelines & customer notifications")]
struct Cli {
    /// Config file (default: ~/.rastro/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config, create the schema, seed system models
    Init {
        /// Also create an owner with this e-mail
        #[arg(long)]
        email: Option<String>,
        /// Plan for the new owner (default: config `default_plan`)
        #[arg(long)]
        plan: Option<String>,
    },
    /// Seed the system delivery models
    SeedModels,
    /// Run the dispatch worker pool until Ctrl-C
    Worker {
        /// Override `dispatch.workers`
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Public status lookup by tracking code
    Status { code: String },
    /// Confirm an order and create its tracking
    Order {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        city: String,
        #[arg(long)]
        state: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// List notifications that failed for an owner
    Failed {
        #[arg(long)]
        owner: String,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(path: Option<&str>) -> Result<RastroConfig> {
    let config = match path {
        Some(p) => RastroConfig::load_from(Path::new(&expand_path(p)))?,
        None => RastroConfig::load()?,
    };
    Ok(config)
}

fn open_db(config: &RastroConfig) -> Result<Arc<PlatformDb>> {
    let db_path = expand_path(&config.database_path);
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = PlatformDb::open(Path::new(&db_path), config.utc_offset()?)
        .with_context(|| format!("opening {db_path}"))?;
    Ok(Arc::new(db))
}

fn now(config: &RastroConfig) -> Result<Instant> {
    Ok(Utc::now().with_timezone(&config.utc_offset()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "rastro=debug,rastro_platform=debug,rastro_scheduler=debug,rastro_channels=debug,rastro_timeline=debug"
    } else {
        "rastro=info,rastro_platform=info,rastro_scheduler=info,rastro_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Init { email, plan } => {
            println!("📦 Rastro — setup\n");
            if cli.config.is_none() && !RastroConfig::default_path().exists() {
                config.save()?;
                println!("✅ Config written to {}", RastroConfig::default_path().display());
            }
            let db = open_db(&config)?;
            let seeded = db.seed_system_models()?;
            println!("✅ Database ready at {} ({} system models added)", expand_path(&config.database_path), seeded);

            if let Some(email) = email {
                match db.get_user_by_email(&email)? {
                    Some(user) => println!("⚠️  Owner '{}' already exists: {}", email, user.id),
                    None => {
                        let plan = plan.unwrap_or_else(|| config.default_plan.clone());
                        let id = db.create_user(&email, &plan, now(&config)?)?;
                        println!("✅ Owner created:");
                        println!("   Email: {email}");
                        println!("   Plan:  {plan}");
                        println!("   Id:    {id}");
                    }
                }
            }
        }

        Command::SeedModels => {
            let db = open_db(&config)?;
            let seeded = db.seed_system_models()?;
            println!("✅ {seeded} system models added");
        }

        Command::Worker { workers } => {
            let db = open_db(&config)?;
            let router = ChannelRouter::from_config(&config.channel)?;
            let settings = WorkerSettings::from_config(&config)?;
            let pool = DispatcherPool::spawn(
                workers.unwrap_or(config.dispatch.workers),
                db,
                Arc::new(router),
                settings,
            );

            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Shutdown requested");
            let stats = pool.shutdown().await;
            println!(
                "📊 sent {}, retried {}, failed {}, cancelled {}",
                stats.sent, stats.retried, stats.failed, stats.cancelled
            );
        }

        Command::Status { code } => {
            let db = open_db(&config)?;
            let service = TrackingService::new(db, QuotaLedger::new(Plans::from_config(&config)));
            let view = service.get_tracking_status(&code, now(&config)?)?;

            println!(
                "📦 {} — {} ({}%)",
                view.tracking.tracking_code,
                view.projection.status.label(),
                view.projection.progress_percent
            );
            println!("   Destino: {}/{}", view.tracking.destination_city, view.tracking.destination_state);
            for event in view.visible_events().iter().rev() {
                println!(
                    "   {}  {}\n      {}",
                    event.simulated_datetime.format("%d/%m/%Y %H:%M"),
                    event.location_label,
                    event.tone_of_voice_text
                );
            }
        }

        Command::Order {
            owner,
            model,
            name,
            city,
            state,
            email,
            phone,
        } => {
            let db = open_db(&config)?;
            let service = TrackingService::new(db, QuotaLedger::new(Plans::from_config(&config)));
            let order = OrderConfirmed {
                owner_id: owner,
                customer_name: name,
                destination_city: city,
                destination_state: state,
                delivery_model_id: model,
                customer_email: email,
                customer_phone: phone,
            };
            let created = service.order_confirmed(order, now(&config)?)?;
            let summary = serde_json::json!({
                "tracking_code": created.tracking.tracking_code,
                "link": rastro_scheduler::notify::tracking_link(
                    &config.public_tracking_url,
                    &created.tracking.tracking_code
                ),
                "delivery_at": created.events.last().map(|e| e.simulated_datetime.to_rfc3339()),
                "events": created.events.len(),
                "notifications": created.notifications.iter().map(|n| serde_json::json!({
                    "channel": n.channel,
                    "due_at": n.due_at.to_rfc3339(),
                })).collect::<Vec<_>>(),
                "monthly_usage": created.monthly_usage,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Failed { owner } => {
            let db = open_db(&config)?;
            let failed = db.list_failed_notifications(&owner)?;
            if failed.is_empty() {
                println!("✅ No failed notifications");
            }
            for job in failed {
                println!(
                    "❌ {} {} → {} ({} attempts): {}",
                    job.channel,
                    job.tracking_id,
                    job.target,
                    job.attempts,
                    job.last_error.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
