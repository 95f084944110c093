use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::changelog::{generator, CommitLogGenerator};
use crate::domain::TagPattern;
use crate::error::{ReleaseError, Result};
use crate::git::{Author, FileStore};

const CONFIG_FILE: &str = "release-bot.toml";

fn default_branch() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_refresh_interval() -> u64 {
    180
}

fn default_call_timeout() -> u64 {
    60
}

fn default_publish_timeout() -> u64 {
    900
}

fn default_tag_pattern() -> String {
    "v{version}".to_string()
}

fn default_changelog_file() -> PathBuf {
    PathBuf::from("CHANGELOG.md")
}

fn default_release_conf_file() -> PathBuf {
    PathBuf::from("release-conf.toml")
}

/// Process-level configuration of the bot for one monitored repository.
///
/// Built once at startup and handed to the pipeline; never mutated afterwards.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BotConfig {
    #[serde(default)]
    pub repository_owner: String,

    #[serde(default)]
    pub repository_name: String,

    #[serde(default = "default_branch")]
    pub default_branch: String,

    #[serde(default = "default_remote")]
    pub remote: String,

    /// Defaults to the GitHub HTTPS URL of the repository
    #[serde(default)]
    pub clone_url: Option<String>,

    #[serde(default)]
    pub checkout_dir: Option<PathBuf>,

    #[serde(default)]
    pub state_file: Option<PathBuf>,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Deadline for each hosting-platform and package-index call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Deadline for building and uploading package artifacts
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_tag_pattern")]
    pub tag_pattern: String,

    /// Changelog path inside the monitored repository
    #[serde(default = "default_changelog_file")]
    pub changelog_file: PathBuf,

    /// Project configuration path inside the monitored repository
    #[serde(default = "default_release_conf_file")]
    pub release_conf_file: PathBuf,

    /// Account the bot acts as; issue triggers need it
    #[serde(default)]
    pub github_username: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            repository_owner: String::new(),
            repository_name: String::new(),
            default_branch: default_branch(),
            remote: default_remote(),
            clone_url: None,
            checkout_dir: None,
            state_file: None,
            refresh_interval_secs: default_refresh_interval(),
            call_timeout_secs: default_call_timeout(),
            publish_timeout_secs: default_publish_timeout(),
            dry_run: false,
            tag_pattern: default_tag_pattern(),
            changelog_file: default_changelog_file(),
            release_conf_file: default_release_conf_file(),
            github_username: None,
        }
    }
}

impl BotConfig {
    /// Parse from TOML text
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ReleaseError::config(e.to_string()))
    }

    /// Check everything needed to drive a repository
    pub fn validate(&self) -> Result<()> {
        if self.repository_owner.trim().is_empty() || self.repository_name.trim().is_empty() {
            return Err(ReleaseError::config(
                "repository_owner and repository_name are required",
            ));
        }
        if self.call_timeout_secs == 0 || self.publish_timeout_secs == 0 {
            return Err(ReleaseError::config(
                "call_timeout_secs and publish_timeout_secs must be positive",
            ));
        }
        self.tag_pattern()?;
        Ok(())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = self.dry_run || dry_run;
        self
    }

    pub fn tag_pattern(&self) -> Result<TagPattern> {
        TagPattern::new(self.tag_pattern.clone())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.repository_owner, self.repository_name)
    }

    pub fn clone_url(&self) -> String {
        self.clone_url.clone().unwrap_or_else(|| {
            format!(
                "https://github.com/{}/{}.git",
                self.repository_owner, self.repository_name
            )
        })
    }

    fn data_dir(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("release-bot")
    }

    fn repo_key(&self) -> String {
        format!("{}-{}", self.repository_owner, self.repository_name)
    }

    pub fn checkout_dir(&self) -> PathBuf {
        self.checkout_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join(self.repo_key()))
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join(format!("{}.json", self.repo_key())))
    }

    /// Lease file next to (not inside) the checkout
    pub fn lease_file(&self) -> PathBuf {
        let checkout = self.checkout_dir();
        let name = checkout
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.repo_key());
        checkout
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}.lock", name))
    }
}

/// Loads bot configuration from file or returns defaults.
///
/// Attempts to load configuration in the following order:
/// 1. Custom path provided as parameter
/// 2. `release-bot.toml` in current directory
/// 3. `release-bot/release-bot.toml` in the user config directory
/// 4. Default configuration if no file found
///
/// # Returns
/// * `Ok(BotConfig)` - Loaded or default configuration
/// * `Err` - If a file exists but cannot be read or parsed
pub fn load_config(config_path: Option<&Path>) -> Result<BotConfig> {
    let candidate = if let Some(path) = config_path {
        Some(path.to_path_buf())
    } else if Path::new(CONFIG_FILE).exists() {
        Some(PathBuf::from(CONFIG_FILE))
    } else {
        dirs::config_dir()
            .map(|dir| dir.join("release-bot").join(CONFIG_FILE))
            .filter(|path| path.exists())
    };

    let Some(path) = candidate else {
        debug!("no configuration file found, using defaults");
        return Ok(BotConfig::default());
    };

    let text = fs::read_to_string(&path)
        .map_err(|e| ReleaseError::config(format!("cannot read {}: {}", path.display(), e)))?;
    debug!("loaded configuration from {}", path.display());
    BotConfig::parse(&text)
        .map_err(|e| ReleaseError::config(format!("{}: {}", path.display(), e)))
}

fn default_pypi() -> bool {
    true
}

/// Per-project release configuration, read from the monitored repository
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReleaseConf {
    #[serde(default = "default_pypi")]
    pub pypi: bool,

    #[serde(default)]
    pub pypi_project: Option<String>,

    #[serde(default)]
    pub trigger_on_issue: bool,

    /// Labels put on the request issue and the release pull request
    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub author_name: Option<String>,

    #[serde(default)]
    pub author_email: Option<String>,

    /// Explicit changelog entries for the next release
    #[serde(default)]
    pub changelog: Vec<String>,

    /// Name of a structured commit-log generator ("conventional")
    #[serde(default)]
    pub changelog_generator: Option<String>,
}

impl Default for ReleaseConf {
    fn default() -> Self {
        ReleaseConf {
            pypi: default_pypi(),
            pypi_project: None,
            trigger_on_issue: false,
            labels: Vec::new(),
            author_name: None,
            author_email: None,
            changelog: Vec::new(),
            changelog_generator: None,
        }
    }
}

impl ReleaseConf {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ReleaseError::config(e.to_string()))
    }

    /// Read the project configuration from the working tree
    ///
    /// A missing file yields defaults. Bot-level facts are folded in: the
    /// package name falls back to the repository name, and issue triggers are
    /// turned off when the bot's own account is unknown.
    pub fn load(files: &dyn FileStore, bot: &BotConfig) -> Result<Self> {
        let mut conf = match files.read_optional(&bot.release_conf_file)? {
            Some(text) => Self::parse(&text).map_err(|e| {
                ReleaseError::config(format!("{}: {}", bot.release_conf_file.display(), e))
            })?,
            None => {
                warn!(
                    "no {} in repository, using defaults",
                    bot.release_conf_file.display()
                );
                ReleaseConf::default()
            }
        };

        if conf.pypi_project.as_deref().map_or(true, str::is_empty) {
            conf.pypi_project = Some(bot.repository_name.clone());
        }
        if conf.trigger_on_issue && bot.github_username.is_none() {
            warn!("trigger_on_issue requires github_username, disabling issue triggers");
            conf.trigger_on_issue = false;
        }
        Ok(conf)
    }

    pub fn pypi_project(&self) -> &str {
        self.pypi_project.as_deref().unwrap_or_default()
    }

    /// Commit identity, with per-field overrides over the bot default
    pub fn author(&self) -> Author {
        let default = Author::default();
        Author {
            name: self.author_name.clone().unwrap_or(default.name),
            email: self.author_email.clone().unwrap_or(default.email),
        }
    }

    /// The configured commit-log generator, if it is a known one
    pub fn generator(&self) -> Option<Box<dyn CommitLogGenerator>> {
        let name = self.changelog_generator.as_deref()?;
        let found = generator::by_name(name);
        if found.is_none() {
            warn!("unknown changelog_generator '{}', ignoring", name);
        }
        found
    }
}
