//! Deploy options
//!
//! Options are read from JSON (camelCase keys). Several keys have aliases so
//! existing option files keep working: `user`, `pass`, `keyLocation`, `auth`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ConfigError;
use crate::sftp::path_utils::{expand_home_marker, normalize_remote_path};
use crate::sftp::types::constants::{
    DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, MAX_CONCURRENT_UPLOADS,
};
use crate::sftp::{MkdirPolicy, SessionPolicy};
use crate::ssh::{AuthMethod, SshConfig};

/// Default auth file, looked up relative to the base directory
pub const DEFAULT_AUTH_FILE: &str = ".ftppass";

/// Private keys tried when nothing else is configured
pub const DEFAULT_KEY_LOCATIONS: [&str; 4] = [
    "~/.ssh/id_rsa",
    "/.ssh/id_rsa",
    "~/.ssh/id_dsa",
    "/.ssh/id_dsa",
];

/// One path or a list of paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// `key` accepts a location, a list of locations, or a full key object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyOption {
    Location(OneOrMany),
    Spec {
        #[serde(default)]
        location: Option<OneOrMany>,
        #[serde(default)]
        contents: Option<String>,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

/// Options as written by the user. Everything is optional until [`resolve`].
///
/// [`resolve`]: DeployOptions::resolve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "user")]
    pub username: Option<String>,
    #[serde(alias = "pass")]
    pub password: Option<String>,
    #[serde(alias = "keyLocation")]
    pub key: Option<KeyOption>,
    pub key_contents: Option<String>,
    pub passphrase: Option<String>,
    pub auth_file: Option<String>,
    #[serde(alias = "auth")]
    pub auth_key: Option<String>,
    pub remote_path: Option<String>,
    pub local_path: Option<String>,
    pub log_files: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub host_fingerprint: Option<String>,
    pub session_policy: Option<SessionPolicy>,
    pub mkdir_policy: Option<MkdirPolicy>,
    pub concurrency: Option<usize>,
    pub dir_mode: Option<u32>,
    pub file_mode: Option<u32>,
    pub clear_remote: Option<bool>,
}

/// Everything the deployer needs besides the SSH connection
#[derive(Debug, Clone, PartialEq)]
pub struct DeploySettings {
    /// Remote deployment root, normalized
    pub remote_path: String,
    /// Local subdirectory of the base that maps onto `remote_path`
    pub local_path: String,
    pub log_files: bool,
    pub session_policy: SessionPolicy,
    pub mkdir_policy: MkdirPolicy,
    pub concurrency: usize,
    pub dir_mode: u32,
    pub file_mode: u32,
    pub clear_remote: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            remote_path: "/".to_string(),
            local_path: String::new(),
            log_files: true,
            session_policy: SessionPolicy::default(),
            mkdir_policy: MkdirPolicy::default(),
            concurrency: MAX_CONCURRENT_UPLOADS,
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: DEFAULT_FILE_MODE,
            clear_remote: false,
        }
    }
}

/// Fully resolved options
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub ssh: SshConfig,
    pub settings: DeploySettings,
}

macro_rules! overlay {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl DeployOptions {
    /// Read options from a JSON file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Fields set in `other` replace the ones in `self`.
    pub fn merge(&mut self, other: DeployOptions) {
        overlay!(
            self,
            other,
            host,
            port,
            username,
            password,
            key,
            key_contents,
            passphrase,
            auth_file,
            auth_key,
            remote_path,
            local_path,
            log_files,
            timeout_secs,
            host_fingerprint,
            session_policy,
            mkdir_policy,
            concurrency,
            dir_mode,
            file_mode,
            clear_remote,
        );
    }

    /// Resolve credentials and defaults. Relative files resolve against `base`.
    pub async fn resolve(self, base: &Path) -> Result<ResolvedOptions, ConfigError> {
        self.resolve_with_home(base, dirs::home_dir()).await
    }

    pub(crate) async fn resolve_with_home(
        mut self,
        base: &Path,
        home: Option<PathBuf>,
    ) -> Result<ResolvedOptions, ConfigError> {
        self.apply_auth_file(base).await?;

        let host = self
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingHost)?;

        let auth = self.resolve_auth(home.as_deref()).await?;
        debug!("Resolved {} authentication", auth.describe());

        let concurrency = self.concurrency.unwrap_or(MAX_CONCURRENT_UPLOADS);
        if concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        let defaults = DeploySettings::default();
        let remote_path = self
            .remote_path
            .map(|p| expand_home_marker(&normalize_remote_path(&p)))
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.remote_path);

        let ssh = SshConfig {
            host,
            port: self.port.unwrap_or(22),
            username: self.username.unwrap_or_else(|| "anonymous".to_string()),
            auth,
            timeout_secs: self.timeout_secs.unwrap_or(30),
            host_fingerprint: self.host_fingerprint,
        };

        let settings = DeploySettings {
            remote_path,
            local_path: self.local_path.unwrap_or(defaults.local_path),
            log_files: self.log_files.unwrap_or(defaults.log_files),
            session_policy: self.session_policy.unwrap_or(defaults.session_policy),
            mkdir_policy: self.mkdir_policy.unwrap_or(defaults.mkdir_policy),
            concurrency,
            dir_mode: self.dir_mode.unwrap_or(defaults.dir_mode),
            file_mode: self.file_mode.unwrap_or(defaults.file_mode),
            clear_remote: self.clear_remote.unwrap_or(defaults.clear_remote),
        };

        Ok(ResolvedOptions { ssh, settings })
    }

    /// Merge the `authKey` entry of the auth file over these options.
    ///
    /// A missing auth file is not an error; a missing entry in an existing
    /// file is.
    async fn apply_auth_file(&mut self, base: &Path) -> Result<(), ConfigError> {
        let Some(auth_key) = self.auth_key.clone() else {
            return Ok(());
        };

        let file = base.join(self.auth_file.as_deref().unwrap_or(DEFAULT_AUTH_FILE));
        if !tokio::fs::try_exists(&file).await? {
            debug!("Auth file {} not found, skipping", file.display());
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&file).await?;
        let mut entries: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&content)?;
        let entry = entries
            .remove(&auth_key)
            .ok_or_else(|| ConfigError::AuthKeyNotFound {
                key: auth_key.clone(),
                file: file.display().to_string(),
            })?;

        let overrides: DeployOptions = serde_json::from_value(entry)?;
        self.merge(overrides);
        Ok(())
    }

    async fn resolve_auth(&self, home: Option<&Path>) -> Result<AuthMethod, ConfigError> {
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            return Ok(AuthMethod::password(password.clone()));
        }

        // No password: a private key is required
        let (locations, mut contents, mut passphrase) = match self.key.clone() {
            Some(KeyOption::Location(loc)) => (Some(loc.into_vec()), None, None),
            Some(KeyOption::Spec {
                location,
                contents,
                passphrase,
            }) => (location.map(OneOrMany::into_vec), contents, passphrase),
            None => (None, None, None),
        };
        contents = contents.or_else(|| self.key_contents.clone());
        passphrase = passphrase.or_else(|| self.passphrase.clone());

        if let Some(contents) = contents {
            return Ok(AuthMethod::key(contents, passphrase));
        }

        let locations = locations
            .unwrap_or_else(|| DEFAULT_KEY_LOCATIONS.iter().map(|s| s.to_string()).collect());
        let candidates: Vec<PathBuf> = locations
            .iter()
            .map(|loc| expand_home(loc, home))
            .collect();

        for candidate in &candidates {
            if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
                debug!("Using private key {}", candidate.display());
                let contents = tokio::fs::read_to_string(candidate).await?;
                return Ok(AuthMethod::key(contents, passphrase));
            }
        }

        Err(ConfigError::KeyNotFound {
            searched: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

/// Resolve a leading `~/` against the home directory
fn expand_home(location: &str, home: Option<&Path>) -> PathBuf {
    match (location.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(location),
    }
}
