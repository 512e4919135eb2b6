//! Configuration structures, the config store and the appservice registration.
//!
//! The bridge configuration is a JSON file. Only two sections matter to the
//! puppet core, every other key belongs to the bridging application and is
//! preserved untouched when credentials are written back.
//!
//! # Configuration File Format
//!
//! ```json
//! {
//!   "puppet": {
//!     "id": "@alice:example.org",
//!     "token": "syt_YWxpY2U_..."
//!   },
//!   "bridge": {
//!     "homeserverUrl": "https://matrix.example.org",
//!     "domain": "example.org"
//!   }
//! }
//! ```
//!
//! # Environment Variable Overrides
//!
//! Any value can be overridden with the `MATRIX_PUPPET_` prefix, nested keys
//! being separated by `__`:
//!
//! ```bash
//! export MATRIX_PUPPET_PUPPET__ID="@alice:example.org"
//! export MATRIX_PUPPET_PUPPET__TOKEN="secret-token"
//! export MATRIX_PUPPET_BRIDGE__HOMESERVERURL="https://matrix.example.org"
//! ```

use std::io;

use figment::{
    Figment,
    providers::{Env, Format, Json, Yaml},
};
use log::{debug, info};
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::PuppetError;

/// Prefix of the environment variables overriding config values.
const ENV_PREFIX: &str = "MATRIX_PUPPET_";

/// Root configuration structure.
///
/// Every field is optional: a fresh bridge starts with an empty `puppet`
/// section and the association flow fills it in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Puppeted account section
    #[serde(default)]
    pub puppet: Puppet,
    /// Bridge section
    #[serde(default)]
    pub bridge: Bridge,
}

/// The puppeted Matrix account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puppet {
    /// Matrix user identifier, e.g. `@alice:example.org`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Access token obtained by a previous login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Bridge settings read by the puppet core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    /// Base URL of the client-server API, e.g. `https://matrix.example.org`.
    #[serde(
        rename = "homeserverUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub homeserver_url: Option<String>,
}

impl Config {
    /// Loads the configuration from a JSON file merged with environment overrides.
    ///
    /// A missing file is not an error, it yields an empty configuration so that
    /// the association flow can start from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`PuppetError::Config`] if the file is not valid JSON or a value
    /// has the wrong type.
    pub fn load(path: &str) -> Result<Config, PuppetError> {
        debug!("load config from {}", path);

        let mut config: Config = Figment::new()
            .merge(Json::file(path))
            .merge(env_overrides())
            .extract()
            .map_err(|e| PuppetError::Config(e.to_string()))?;

        // Environment keys are lowercased, so the camelCase key needs its own lookup
        if let Ok(homeserver_url) =
            Figment::from(env_overrides()).extract_inner::<String>("bridge.homeserverurl")
        {
            config.bridge.homeserver_url = Some(homeserver_url);
        }

        Ok(config)
    }
}

/// Environment provider for `MATRIX_PUPPET_*` overrides.
fn env_overrides() -> Env {
    Env::prefixed(ENV_PREFIX).split("__")
}

/// Loads and persists the configuration.
///
/// The association flow is the only caller of [`ConfigStore::save`].
#[automock]
pub trait ConfigStore {
    /// Reads the current configuration.
    async fn load(&self) -> Result<Config, PuppetError>;
    /// Writes the puppet and bridge credential keys of `config` back.
    async fn save(&self, config: &Config) -> Result<(), PuppetError>;
}

/// [`ConfigStore`] backed by a JSON file on disk.
pub struct JsonConfigStore {
    /// Path of the JSON config file
    path: String,
}

impl JsonConfigStore {
    /// Creates a store for the JSON file at `path`.
    pub fn new(path: &str) -> Self {
        JsonConfigStore {
            path: path.to_owned(),
        }
    }
}

impl ConfigStore for JsonConfigStore {
    async fn load(&self) -> Result<Config, PuppetError> {
        Config::load(&self.path)
    }

    /// Merges the credential keys into the file, keeping every other key.
    ///
    /// Only `puppet.id`, `puppet.token` and `bridge.homeserverUrl` are written.
    /// A missing file is created. A file that cannot be read or is not a JSON
    /// object is left untouched and an error is returned.
    async fn save(&self, config: &Config) -> Result<(), PuppetError> {
        let mut root = match fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| PuppetError::Config(format!("{}: {}", self.path, e)))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Value::Object(Map::new()),
            Err(e) => return Err(PuppetError::Config(format!("{}: {}", self.path, e))),
        };

        merge_credentials(&mut root, config)?;

        let serialized =
            serde_json::to_string_pretty(&root).map_err(|e| PuppetError::Config(e.to_string()))?;
        fs::write(&self.path, serialized)
            .await
            .map_err(|e| PuppetError::Config(format!("{}: {}", self.path, e)))?;

        info!("config saved to {}", self.path);
        Ok(())
    }
}

/// Writes the credential keys of `config` into the JSON document `root`.
fn merge_credentials(root: &mut Value, config: &Config) -> Result<(), PuppetError> {
    let Value::Object(root) = root else {
        return Err(PuppetError::Config(
            "config root is not a JSON object".to_owned(),
        ));
    };

    let puppet = section(root, "puppet")?;
    if let Some(id) = &config.puppet.id {
        puppet.insert("id".to_owned(), Value::String(id.clone()));
    }
    if let Some(token) = &config.puppet.token {
        puppet.insert("token".to_owned(), Value::String(token.clone()));
    }

    let bridge = section(root, "bridge")?;
    if let Some(homeserver_url) = &config.bridge.homeserver_url {
        bridge.insert(
            "homeserverUrl".to_owned(),
            Value::String(homeserver_url.clone()),
        );
    }

    Ok(())
}

/// Returns the object stored under `key`, creating it when absent.
fn section<'a>(
    root: &'a mut Map<String, Value>,
    key: &str,
) -> Result<&'a mut Map<String, Value>, PuppetError> {
    match root
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(section) => Ok(section),
        _ => Err(PuppetError::Config(format!("`{}` is not a JSON object", key))),
    }
}

/// Appservice registration data consumed during login.
pub trait Registration {
    /// Localpart of the appservice sender user.
    fn sender_localpart(&self) -> &str;
}

/// Appservice registration file (YAML), as handed to the homeserver.
///
/// ```yaml
/// id: my-bridge
/// sender_localpart: my-bridge
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationFile {
    /// Localpart of the appservice sender user
    pub sender_localpart: String,
}

impl RegistrationFile {
    /// Loads the registration YAML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PuppetError::Config`] if the file is missing, is not YAML or
    /// has no `sender_localpart`.
    pub fn load(path: &str) -> Result<RegistrationFile, PuppetError> {
        debug!("load registration from {}", path);

        Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| PuppetError::Config(e.to_string()))
    }
}

impl Registration for RegistrationFile {
    fn sender_localpart(&self) -> &str {
        &self.sender_localpart
    }
}
