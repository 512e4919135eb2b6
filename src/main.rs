//! matrix-puppet - association and startup of a puppeted Matrix account.
//!
//! # Usage
//!
//! Associate the puppet account once. Missing values are asked on the
//! terminal and the resolved credentials are written back to the config file:
//!
//! ```bash
//! matrix-puppet --config config.json --registration registration.yaml associate
//! ```
//!
//! Then start the session from the persisted credentials:
//!
//! ```bash
//! matrix-puppet --config config.json --data ./puppet-data run
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)
//! - `MATRIX_PUPPET_*` - Config overrides, see [`matrix_puppet::config`]

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};

use matrix_puppet::{
    Credentials, PuppetSession, SessionOptions,
    association::associate,
    config::{ConfigStore, JsonConfigStore, RegistrationFile},
    credentials::{CredentialResolver, ResolveOptions, TerminalPrompter},
    matrix::{HomeserverRequester, MatrixAuthenticator},
};

/// Command-line arguments of matrix-puppet.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    ///
    /// A missing file is treated as an empty configuration.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Path to the appservice registration YAML file.
    ///
    /// Its `sender_localpart` names the device created at login.
    #[arg(short, long)]
    registration: Option<String>,

    /// Directory holding the Matrix SDK state store.
    ///
    /// State is kept in memory when omitted.
    #[arg(short, long)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the puppet credentials and save them to the config file
    Associate {
        /// Print the new config sections instead of saving them
        #[arg(long)]
        print: bool,
    },
    /// Start the puppet session from the saved credentials
    Run,
}

#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting matrix-puppet {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let result = match &args.command {
        Command::Associate { print } => run_association(&args, *print).await,
        Command::Run => run_session(&args).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Resolves the credentials and persists them, or prints them with `print`.
async fn run_association(args: &Args, print: bool) -> anyhow::Result<()> {
    let store = JsonConfigStore::new(&args.config);
    let config = store.load().await.context("failed to load config file")?;

    let registration = match &args.registration {
        Some(path) => {
            Some(RegistrationFile::load(path).context("failed to load registration file")?)
        }
        None => None,
    };
    let options = ResolveOptions::from_registration(registration.as_ref());

    let resolver = CredentialResolver::new(
        TerminalPrompter::new(),
        HomeserverRequester::new(),
        MatrixAuthenticator::new(),
    );
    let store = if print { None } else { Some(&store) };

    let resolution = associate(store, &config, &resolver, &options)
        .await
        .context("association failed")?;

    info!(
        "puppet {} associated with {}",
        resolution.credentials.user_id, resolution.credentials.homeserver_url
    );
    Ok(())
}

/// Starts the session and keeps it alive until Ctrl-C.
async fn run_session(args: &Args) -> anyhow::Result<()> {
    let config = JsonConfigStore::new(&args.config)
        .load()
        .await
        .context("failed to load config file")?;

    let Some(credentials) = Credentials::from_config(&config) else {
        bail!(
            "no puppet credentials in {}, run `matrix-puppet associate` first",
            args.config
        );
    };

    let options = SessionOptions {
        store_path: args.data.as_ref().map(|data| data.join("session")),
    };
    let session = PuppetSession::start(&credentials, options)
        .await
        .context("failed to start puppet session")?;

    info!("puppet {} is running, press Ctrl-C to stop", session.user_id());
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    Ok(())
}
