//! Outliner notifier
//!
//! Watches new posts and follows in Firestore and pushes "New Mention" and
//! "New Follower" notifications through FCM.
//!
//! Usage:
//!   outliner-notifier --config firebase.json --credentials service-account.json
//!
//! Without `--config` the FIREBASE_* environment variables are used; a `.env`
//! file in the working directory is loaded first.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use outliner_firebase::notify::Notifier;
use outliner_firebase::{initialize_with, AppOptions, Endpoints, FirebaseConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "outliner-notifier")]
#[command(about = "Mention and follower push notifications for Outliner")]
struct Args {
    /// Firebase web config JSON (apiKey, authDomain, projectId, ...)
    #[arg(short, long, env = "FIREBASE_CONFIG")]
    config: Option<PathBuf>,

    /// Service account key file
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Dotenv file to load before reading the environment
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parsed twice: the dotenv file must be loaded before clap reads `env` fallbacks.
    let env_file = Args::parse().env_file;
    let dotenv = dotenvy::from_path(&env_file);
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match dotenv {
        Ok(()) => info!(path = %args.env_file.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(path = %args.env_file.display(), error = %e, "could not load environment file"),
    }

    let config = match &args.config {
        Some(path) => FirebaseConfig::from_file(path)
            .with_context(|| format!("failed to read Firebase config from {}", path.display()))?,
        None => FirebaseConfig::from_env().context("failed to read Firebase config from the environment")?,
    };

    let service_account = match &args.credentials {
        Some(path) => Some(
            yup_oauth2::read_service_account_key(path)
                .await
                .with_context(|| format!("failed to read service account key from {}", path.display()))?,
        ),
        None => {
            warn!("no service account given, falling back to the web API key");
            None
        }
    };

    let options = AppOptions {
        service_account,
        endpoints: Endpoints::from_env(),
    };
    let firebase = initialize_with(&config, options).context("error initializing firebase app")?;

    info!(
        project_id = %firebase.app.project_id(),
        "Firestore client and FCM client successfully created. Listening for changes..."
    );

    let notifier = Notifier::new(&firebase.db, &firebase.messaging);
    tokio::select! {
        _ = notifier.run() => info!("notifier stopped"),
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutting down");
        }
    }

    Ok(())
}
