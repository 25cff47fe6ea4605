//! Command-line interface parsing for moodlenav
//!
//! This module defines the clap argument structure and merges command-line
//! overrides into the loaded [`Config`].

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::config::{Config, ConfigError, SourceKind};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// `--semester` and `--all` both given
    #[error("Use either --semester or --all, not both")]
    ConflictingFilter,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// moodlenav - Browse your enrolled Moodle courses by semester
#[derive(Parser, Debug)]
#[command(name = "moodlenav")]
#[command(about = "Browse enrolled Moodle courses by semester, with a local course cache")]
#[command(version)]
pub struct Cli {
    /// Portal root URL (overrides the config file)
    #[arg(long, global = true, env = "MOODLE_URL", value_name = "URL")]
    pub base_url: Option<String>,

    /// Session key from a logged-in page (the `sesskey` in the logout link)
    #[arg(long, global = true, env = "MOODLE_SESSKEY", value_name = "KEY")]
    pub sesskey: Option<String>,

    /// Value of the `MoodleSession` cookie
    #[arg(long, global = true, env = "MOODLE_SESSION", value_name = "COOKIE")]
    pub cookie: Option<String>,

    /// Where to get the course list from
    #[arg(long, global = true, value_enum)]
    pub source: Option<SourceKind>,

    /// Config file to use instead of the default one
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List courses of the selected semester (default command)
    Courses {
        /// Ignore the cache and fetch from the portal
        #[arg(long)]
        refresh: bool,
        /// Show this semester instead of the selected one (also selects it)
        #[arg(long, value_name = "SEMESTER")]
        semester: Option<String>,
        /// Show courses of every semester
        #[arg(long)]
        all: bool,
    },
    /// List known semesters
    Semesters,
    /// Select the semester shown by `courses`
    Select {
        semester: String,
    },
    /// Fetch the course list now
    Refresh,
    /// Delete the cached course list
    Clear,
    /// Show or change preferences
    Prefs {
        #[arg(long, value_enum, value_name = "on|off")]
        auto_login: Option<Switch>,
        #[arg(long, value_enum, value_name = "on|off")]
        focus_mode: Option<Switch>,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Courses {
            refresh: false,
            semester: None,
            all: false,
        }
    }
}

/// On/off value for boolean preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> bool {
        matches!(switch, Switch::On)
    }
}

impl Cli {
    /// The subcommand to run, `courses` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or_default()
    }

    /// Checks argument combinations clap cannot express on its own
    pub fn validate(&self) -> Result<(), CliError> {
        if let Some(Command::Courses {
            semester: Some(_),
            all: true,
            ..
        }) = &self.command
        {
            return Err(CliError::ConflictingFilter);
        }
        Ok(())
    }

    /// Loads the config file and applies command-line overrides
    pub fn resolve_config(&self) -> Result<Config, CliError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_default()?,
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.base_url {
            config.base_url = Some(url.clone());
        }
        if let Some(source) = self.source {
            config.source = source;
        }
    }
}
