//! Layered configuration.
//!
//! Values are merged from, in increasing priority:
//!
//! 1. compiled defaults,
//! 2. `config.toml`, `config.yaml` and `config.json` in the platform
//!    configuration folder (all optional),
//! 3. a file named on the command line, which must exist,
//! 4. `TANDEM_` environment variables, with `__` between nested keys
//!    (`TANDEM_JOBS__MAX_CONCURRENT=4`).
//!
//! The merged result is validated before it's handed out.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "TANDEM_";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub jobs: JobsConfig,
    pub archives: ArchivesConfig,
    pub http: HttpConfig,
    /// Only present when S3 credentials are configured.
    pub s3: Option<S3Config>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// How many jobs may run at once; the rest wait in `created`.
    pub max_concurrent: usize,
    /// Chunk size for streamed copies, in bytes.
    pub buffer_size: usize,
    /// Walk every selection before starting so progress has totals.
    pub compute_totals: bool,
}
impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            buffer_size: 64 * 1024,
            compute_totals: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivesConfig {
    /// Look at a file's first bytes when its name doesn't say what it is.
    pub sniff_content: bool,
}
impl Default for ArchivesConfig {
    fn default() -> Self {
        Self { sniff_content: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}
impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("tandem/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub region: String,
    /// For S3-compatible services; AWS itself needs none.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}
impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load every layer, using the platform configuration folder.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let folder = Self::folder();
        Self::load_from(folder.as_deref(), explicit)
    }

    /// Load every layer, looking for default files in `folder` instead of
    /// the platform configuration folder.
    pub fn load_from(folder: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(folder, explicit)?.extract().or_raise(|| ErrorKind::Parse)?;
        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// The platform configuration folder, such as `~/.config/tandem`.
    pub fn folder() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tandem").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// The merged provider stack, before extraction.
    pub fn figment(folder: Option<&Path>, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(folder) = folder {
            figment = figment
                .merge(Toml::file(folder.join("config.toml")))
                .merge(Yaml::file(folder.join("config.yaml")))
                .merge(Json::file(folder.join("config.json")));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            tracing::debug!(path = %path.display(), "Using configuration file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs.max_concurrent == 0 {
            exn::bail!(ErrorKind::Invalid("jobs.max_concurrent must be at least 1".to_string()));
        }
        if self.jobs.buffer_size == 0 {
            exn::bail!(ErrorKind::Invalid("jobs.buffer_size must be at least 1".to_string()));
        }
        if self.http.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("http.timeout_secs must be at least 1".to_string()));
        }
        if let Some(s3) = &self.s3
            && s3.region.trim().is_empty()
        {
            exn::bail!(ErrorKind::Invalid("s3.region must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            let config = Config::load_from(Some(jail.directory()), None).unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.jobs.max_concurrent, 2);
            assert_eq!(config.jobs.buffer_size, 65536);
            assert!(config.archives.sniff_content);
            assert!(config.s3.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_layers_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[jobs]\nmax_concurrent = 3\nbuffer_size = 1024\n")?;
            jail.create_file("config.yaml", "jobs:\n  max_concurrent: 5\n")?;
            jail.create_file("override.json", r#"{"http": {"timeout_secs": 9}}"#)?;
            jail.set_env("TANDEM_JOBS__BUFFER_SIZE", 4096);
            jail.set_env("TANDEM_ARCHIVES__SNIFF_CONTENT", false);

            let explicit = jail.directory().join("override.json");
            let config = Config::load_from(Some(jail.directory()), Some(&explicit)).unwrap();
            assert_eq!(config.jobs.max_concurrent, 5);
            assert_eq!(config.jobs.buffer_size, 4096);
            assert_eq!(config.http.timeout_secs, 9);
            assert!(!config.archives.sniff_content);
            assert!(config.http.user_agent.starts_with("tandem/"));
            Ok(())
        });
    }

    #[test]
    fn test_s3_section() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "[s3]\nregion = \"us-west-004\"\nendpoint = \"https://s3.example.com\"\nkey_id = \"id\"\nkey_secret = \"shh\"\n",
            )?;
            let config = Config::load_from(Some(jail.directory()), None).unwrap();
            let s3 = config.s3.unwrap();
            assert_eq!(s3.region, "us-west-004");
            assert_eq!(s3.endpoint.as_deref(), Some("https://s3.example.com"));
            assert!(!format!("{s3:?}").contains("shh"));
            Ok(())
        });
    }

    /// Environment variables are process wide, so every test runs inside a
    /// jail even when it only needs a scratch file.
    fn load_file(name: &str, content: &str) -> crate::error::Error {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let mut outcome = None;
        Jail::expect_with(|_jail| {
            outcome = Some(Config::load_from(None, Some(&path)).unwrap_err());
            Ok(())
        });
        outcome.unwrap()
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|jail| {
            let missing = jail.directory().join("nope.toml");
            let err = Config::load_from(None, Some(&missing)).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(path) if path == &missing));
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file() {
        let err = load_file("bad.toml", "[jobs]\nmax_concurrent = \"lots\"\n");
        assert!(matches!(&*err, ErrorKind::Parse));
    }

    #[rstest]
    #[case::no_workers("[jobs]\nmax_concurrent = 0\n", "jobs.max_concurrent")]
    #[case::no_buffer("[jobs]\nbuffer_size = 0\n", "jobs.buffer_size")]
    #[case::no_timeout("[http]\ntimeout_secs = 0\n", "http.timeout_secs")]
    #[case::blank_region("[s3]\nregion = \" \"\nkey_id = \"a\"\nkey_secret = \"b\"\n", "s3.region")]
    fn test_validation(#[case] content: &str, #[case] field: &str) {
        let err = load_file("config.toml", content);
        assert!(matches!(&*err, ErrorKind::Invalid(message) if message.contains(field)));
    }
}
