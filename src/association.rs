//! One-time association of the puppet account with the bridge.
//!
//! Association resolves the puppet credentials and, when they differ from the
//! configuration, writes them back through the [`ConfigStore`]. Without a
//! store, the new `puppet` and `bridge` sections are printed so the operator
//! can apply them by hand.

use log::info;

use crate::{
    config::{Config, ConfigStore},
    credentials::{CredentialResolver, Credentials, Prompter, Resolution, ResolveOptions},
    error::PuppetError,
    matrix::{Authenticator, Discovery},
};

/// Runs the association flow.
///
/// The configuration is left untouched when resolution fails or when nothing
/// changed.
///
/// # Arguments
///
/// * `store` - Where new credentials are saved, `None` to print them instead
/// * `config` - Current configuration
/// * `resolver` - Resolver completing the credentials
/// * `options` - Options of the resolution
///
/// # Errors
///
/// Returns any resolution error, or [`PuppetError::Config`] if the updated
/// configuration cannot be saved.
pub async fn associate<S, P, D, A>(
    store: Option<&S>,
    config: &Config,
    resolver: &CredentialResolver<P, D, A>,
    options: &ResolveOptions,
) -> Result<Resolution, PuppetError>
where
    S: ConfigStore,
    P: Prompter,
    D: Discovery,
    A: Authenticator,
{
    let resolution = resolver.resolve(config, options).await?;

    if !resolution.changed {
        info!("puppet credentials already up to date");
        return Ok(resolution);
    }

    match store {
        Some(store) => store.save(&resolution.credentials.to_config()).await?,
        None => {
            info!("no config store available, apply these sections manually");
            println!("{}", config_delta(&resolution.credentials)?);
        }
    }

    Ok(resolution)
}

/// Renders the `puppet` and `bridge` sections holding `credentials`.
pub fn config_delta(credentials: &Credentials) -> Result<String, PuppetError> {
    serde_json::to_string_pretty(&credentials.to_config())
        .map_err(|e| PuppetError::Config(e.to_string()))
}
