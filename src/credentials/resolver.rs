//! Staged credential resolution.
//!
//! Resolution runs an ordered list of [`Stage`]s over [`PartialCredentials`]:
//!
//! ```text
//! Identifier ──▶ Homeserver ──▶ Token
//!  config id      config url     config token
//!  or prompt      or discovery   or password prompt + login
//!                 or prompt
//! ```
//!
//! A stage whose output is already present in the configuration is skipped,
//! so a fully populated configuration resolves without any prompt, discovery
//! or login.

use log::{debug, info, warn};

use crate::{
    config::{Config, Registration},
    credentials::{Credentials, Prompter, non_empty, parse_mxid},
    error::PuppetError,
    matrix::{
        Authenticator, Discovery, LoginRequest,
        requester::{is_absolute_url, normalize_base_url},
    },
};

/// Options of [`CredentialResolver::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Display name of the device created by a password login
    pub device_display_name: Option<String>,
}

impl ResolveOptions {
    /// Uses the registration's sender localpart as device display name.
    pub fn from_registration<R: Registration + ?Sized>(registration: Option<&R>) -> Self {
        ResolveOptions {
            device_display_name: registration
                .map(|registration| registration.sender_localpart().to_owned())
                .filter(|name| !name.is_empty()),
        }
    }
}

/// Outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved credentials
    pub credentials: Credentials,
    /// Whether the credentials differ from the configuration they came from
    pub changed: bool,
}

/// One step of the resolution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// User id of the puppet
    Identifier,
    /// Client-server API base URL
    Homeserver,
    /// Access token
    Token,
}

/// Stages in execution order.
const STAGES: [Stage; 3] = [Stage::Identifier, Stage::Homeserver, Stage::Token];

impl Stage {
    /// Whether the output of this stage is already known.
    fn is_satisfied(self, partial: &PartialCredentials) -> bool {
        match self {
            Stage::Identifier => partial.user_id.is_some(),
            Stage::Homeserver => partial.homeserver_url.is_some(),
            Stage::Token => partial.access_token.is_some(),
        }
    }
}

/// Credentials being resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PartialCredentials {
    homeserver_url: Option<String>,
    user_id: Option<String>,
    access_token: Option<String>,
}

impl PartialCredentials {
    /// Starts from the configured values, empty strings counting as absent.
    fn from_config(config: &Config) -> Self {
        PartialCredentials {
            homeserver_url: non_empty(&config.bridge.homeserver_url),
            user_id: non_empty(&config.puppet.id),
            access_token: non_empty(&config.puppet.token),
        }
    }

    fn user_id(&self) -> Result<&str, PuppetError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| PuppetError::InvalidIdentifier(String::new()))
    }

    fn homeserver_url(&self) -> Result<&str, PuppetError> {
        self.homeserver_url
            .as_deref()
            .ok_or_else(|| PuppetError::Discovery("no homeserver resolved".to_owned()))
    }

    /// Checks that every value is known and that the user id is well formed.
    fn into_credentials(self) -> Result<Credentials, PuppetError> {
        let user_id = self.user_id()?.to_owned();
        parse_mxid(&user_id)?;

        Ok(Credentials {
            homeserver_url: self.homeserver_url()?.to_owned(),
            access_token: self
                .access_token
                .ok_or_else(|| PuppetError::Login("no access token obtained".to_owned()))?,
            user_id,
        })
    }
}

/// Resolves the credentials of the puppet from a partial configuration.
///
/// # Type Parameters
///
/// * `P` - Asks the operator for missing values
/// * `D` - Discovers the homeserver of a domain
/// * `A` - Exchanges a password for an access token
pub struct CredentialResolver<P: Prompter, D: Discovery, A: Authenticator> {
    prompter: P,
    discovery: D,
    authenticator: A,
}

impl<P: Prompter, D: Discovery, A: Authenticator> CredentialResolver<P, D, A> {
    /// Creates a new resolver.
    ///
    /// # Arguments
    ///
    /// * `prompter` - Operator input, used for every value discovery and login cannot provide
    /// * `discovery` - Well-known lookup of the homeserver
    /// * `authenticator` - Password login
    pub fn new(prompter: P, discovery: D, authenticator: A) -> Self {
        CredentialResolver {
            prompter,
            discovery,
            authenticator,
        }
    }

    /// Completes the credentials found in `config`.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration holding the values known so far
    /// * `options` - Login options, only used when a password login runs
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The final user id is malformed ([`PuppetError::InvalidIdentifier`])
    /// - Neither discovery nor the operator yields a homeserver ([`PuppetError::Discovery`])
    /// - The homeserver rejects the login ([`PuppetError::Login`])
    /// - Operator input cannot be read ([`PuppetError::Prompt`])
    pub async fn resolve(
        &self,
        config: &Config,
        options: &ResolveOptions,
    ) -> Result<Resolution, PuppetError> {
        let mut partial = PartialCredentials::from_config(config);

        for stage in STAGES {
            if stage.is_satisfied(&partial) {
                debug!("{:?} taken from the configuration", stage);
                continue;
            }
            debug!("resolve {:?}", stage);
            partial = self.run(stage, partial, options).await?;
        }

        let credentials = partial.into_credentials()?;
        let changed = Credentials::from_config(config).as_ref() != Some(&credentials);
        info!(
            "credentials of {} resolved on {}",
            credentials.user_id, credentials.homeserver_url
        );

        Ok(Resolution {
            credentials,
            changed,
        })
    }

    /// Runs a single stage.
    async fn run(
        &self,
        stage: Stage,
        mut partial: PartialCredentials,
        options: &ResolveOptions,
    ) -> Result<PartialCredentials, PuppetError> {
        match stage {
            Stage::Identifier => {
                let answer = self
                    .prompter
                    .ask("Matrix user id (e.g. @alice:example.org): ")
                    .await?;
                partial.user_id = Some(answer.trim().to_owned());
            }
            Stage::Homeserver => {
                let homeserver_url = self.find_homeserver(partial.user_id()?).await?;
                partial.homeserver_url = Some(homeserver_url);
            }
            Stage::Token => {
                let request = LoginRequest {
                    homeserver_url: partial.homeserver_url()?.to_owned(),
                    user: partial.user_id()?.to_owned(),
                    password: self
                        .prompter
                        .ask_secret(&format!("Password of {}: ", partial.user_id()?))
                        .await?,
                    device_display_name: options.device_display_name.clone(),
                };
                let outcome = self.authenticator.login(&request).await?;

                if outcome.user_id != request.user {
                    info!("homeserver identified {} as {}", request.user, outcome.user_id);
                }
                partial.user_id = Some(outcome.user_id);
                partial.access_token = Some(outcome.access_token);
                if let Some(homeserver_url) = outcome.homeserver_url {
                    partial.homeserver_url = Some(homeserver_url);
                }
            }
        }

        Ok(partial)
    }

    /// Discovers the homeserver of `user_id`, falling back to the operator.
    ///
    /// An answer that is not an absolute URL is taken as a domain and
    /// discovered in turn.
    async fn find_homeserver(&self, user_id: &str) -> Result<String, PuppetError> {
        let discovered = match parse_mxid(user_id) {
            Ok(mxid) => self.discovery.discover(&mxid.domain).await,
            Err(e) => Err(e),
        };
        match discovered {
            Ok(homeserver_url) => return Ok(homeserver_url),
            Err(e) => warn!("no homeserver discovered for {}: {}", user_id, e),
        }

        let answer = self.prompter.ask("Homeserver URL: ").await?;
        let answer = answer.trim();
        if is_absolute_url(answer) {
            return Ok(normalize_base_url(answer).to_owned());
        }

        debug!("`{}` is not a URL, discover it as a domain", answer);
        self.discovery
            .discover(answer)
            .await
            .map_err(|e| match e {
                PuppetError::Discovery(_) => e,
                other => PuppetError::Discovery(other.to_string()),
            })
    }
}
