//! Notewise: push reminders for notes
//!
//! Main binary with subcommands:
//! - `daemon`: Run the reminder scheduler until Ctrl-C
//! - `check`: Run one reminder tick and print what happened
//! - `subscribe`: Store a browser push subscription for a user
//! - `vapid-public-key`: Print the application server key for browsers

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;
mod subscribe;

use config::Settings;

#[derive(Parser)]
#[command(name = "notewise")]
#[command(about = "Push reminders for notes", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reminder scheduler until interrupted
    Daemon,

    /// Run exactly one reminder tick and print the report as JSON
    Check,

    /// Validate and store a browser push subscription for a user
    Subscribe {
        /// User id
        #[arg(long)]
        user: i64,

        /// File holding the subscription JSON, or `-` for stdin
        #[arg(long, required_unless_present = "clear")]
        subscription: Option<String>,

        /// Remove the user's subscription instead
        #[arg(long, conflicts_with = "subscription")]
        clear: bool,
    },

    /// Print the VAPID application server key browsers subscribe with
    VapidPublicKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "notewise=info,notewise_reminders=info,notewise_push=info,notewise_store=info"
                    .to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon => daemon::run(&cli.settings).await,
        Commands::Check => daemon::check(&cli.settings).await,
        Commands::Subscribe {
            user,
            subscription,
            clear,
        } => subscribe::run(&cli.settings, user, subscription.as_deref(), clear).await,
        Commands::VapidPublicKey => {
            let pem = cli.settings.read_private_key().await?;
            let key = notewise_push::derive_public_key(&pem).map_err(|e| miette::miette!("{}", e))?;
            println!("{}", key);
            Ok(())
        }
    }
}
