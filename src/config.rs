//! Configuration Loader
//! - Reads kaboom.toml for the `[pg_kaboom]` session settings
//! - Provides CLI argument parsing with clap

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Phrase the disclaimer setting must match before anything is blown up
pub const DISCLAIMER: &str = "I can afford to lose this data and server";

// =============================================================================
// Session Settings
// =============================================================================

/// Settings consulted on every dispatch.
///
/// Passed explicitly into the dispatcher; nothing here is global.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Must equal [`DISCLAIMER`] to unlock dispatch
    pub disclaimer: String,
    /// false = dry-run: commands are only announced
    pub execute: bool,
    /// Scratch slot holding the archive_command replaced by `break-archive`
    pub saved_archive_command: String,
}

#[derive(Deserialize, Default)]
struct SettingsFile {
    pg_kaboom: Option<Settings>,
}

/// Load settings from a TOML file.
///
/// A missing file yields defaults; a file without a `[pg_kaboom]` table
/// yields defaults too.
pub fn load_settings(path: &Path) -> io::Result<Settings> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        Err(e) => return Err(e),
    };

    parse_settings(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write `saved_archive_command` into the `[pg_kaboom]` table of the settings
/// file, keeping every other key. A missing file is created.
pub fn store_saved_archive_command(path: &Path, value: &str) -> io::Result<()> {
    let mut table = match fs::read_to_string(path) {
        Ok(contents) => contents
            .parse::<toml::Table>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => toml::Table::new(),
        Err(e) => return Err(e),
    };

    let section = table
        .entry("pg_kaboom")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    let toml::Value::Table(section) = section else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "pg_kaboom is not a table",
        ));
    };
    section.insert(
        "saved_archive_command".to_string(),
        toml::Value::String(value.to_string()),
    );

    let rendered =
        toml::to_string(&table).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, rendered)?;
    tracing::debug!(path = %path.display(), "stored saved_archive_command");
    Ok(())
}

fn parse_settings(contents: &str) -> Result<Settings, toml::de::Error> {
    let file: SettingsFile = toml::from_str(contents)?;
    Ok(file.pg_kaboom.unwrap_or_default())
}

// =============================================================================
// CLI Configuration
// =============================================================================

/// Output format for notices
#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    /// Human-readable NOTICE/HINT lines (to stderr)
    #[default]
    Human,
    /// Machine-readable NDJSON (to stdout)
    Json,
}

/// kaboom - chaos weapons for PostgreSQL
#[derive(Parser)]
#[command(name = "kaboom", version, about = "Deliberately break a PostgreSQL cluster")]
pub struct Cli {
    /// Settings file (also: KABOOM_CONFIG env var)
    #[arg(long, env = "KABOOM_CONFIG", default_value = "kaboom.toml", global = true)]
    pub config: PathBuf,

    /// Cluster data directory (also: PGDATA env var)
    #[arg(long, short = 'D', env = "PGDATA", global = true)]
    pub pgdata: Option<PathBuf>,

    /// Overrides the disclaimer from the settings file
    #[arg(long, env = "KABOOM_DISCLAIMER", global = true)]
    pub disclaimer: Option<String>,

    /// Actually run commands instead of announcing them
    #[arg(long, env = "KABOOM_EXECUTE", global = true)]
    pub execute: bool,

    /// Output format (also: KABOOM_FORMAT env var)
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, env = "KABOOM_FORMAT", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Fire a weapon by name
    Fire {
        /// Weapon name (case-insensitive)
        operation: String,
        /// JSON object with weapon-specific overrides
        #[arg(long)]
        payload: Option<String>,
    },
    /// List every weapon with its description
    Arsenal,
}

impl Cli {
    /// Apply command-line overrides on top of file settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(disclaimer) = &self.disclaimer {
            settings.disclaimer = disclaimer.clone();
        }
        if self.execute {
            settings.execute = true;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_settings_table() {
        let toml_content = r#"
[pg_kaboom]
disclaimer = "I can afford to lose this data and server"
execute = true
"#;
        let settings = parse_settings(toml_content).unwrap();
        assert_eq!(settings.disclaimer, DISCLAIMER);
        assert!(settings.execute);
        assert!(settings.saved_archive_command.is_empty());
    }

    #[test]
    fn test_parse_settings_without_table() {
        let toml_content = r#"
[other]
key = "value"
"#;
        let settings = parse_settings(toml_content).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_default_is_dry_run() {
        let settings = Settings::default();
        assert!(!settings.execute);
        assert!(settings.disclaimer.is_empty());
    }

    #[test]
    fn test_load_settings_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let settings = load_settings(&temp_dir.path().join("kaboom.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kaboom.toml");
        std::fs::write(&path, "[pg_kaboom]\nexecute = \"maybe\"\n").unwrap();

        let err = load_settings(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_store_saved_archive_command_keeps_other_keys() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kaboom.toml");
        std::fs::write(
            &path,
            format!("[pg_kaboom]\ndisclaimer = \"{}\"\n\n[other]\nkey = 1\n", DISCLAIMER),
        )
        .unwrap();

        store_saved_archive_command(&path, "cp %p 'C:\\arch\\%f'").unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.disclaimer, DISCLAIMER);
        assert_eq!(settings.saved_archive_command, "cp %p 'C:\\arch\\%f'");
        assert!(std::fs::read_to_string(&path).unwrap().contains("[other]"));
    }

    #[test]
    fn test_store_saved_archive_command_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kaboom.toml");

        store_saved_archive_command(&path, "cp %p /archive/%f").unwrap();
        assert_eq!(
            load_settings(&path).unwrap().saved_archive_command,
            "cp %p /archive/%f"
        );
    }

    #[test]
    fn test_store_refuses_non_table_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kaboom.toml");
        std::fs::write(&path, "pg_kaboom = 3\n").unwrap();

        let err = store_saved_archive_command(&path, "x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_cli_overrides_file_settings() {
        let cli = Cli::parse_from([
            "kaboom",
            "--disclaimer",
            "from the command line",
            "--execute",
            "fire",
            "null",
        ]);
        let mut settings = Settings {
            disclaimer: "from the file".to_string(),
            ..Settings::default()
        };
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.disclaimer, "from the command line");
        assert!(settings.execute);
    }

    #[test]
    fn test_cli_fire_with_payload() {
        let cli = Cli::parse_from([
            "kaboom",
            "fire",
            "signal",
            "--payload",
            r#"{"signal": 15}"#,
        ]);
        match cli.command {
            Commands::Fire { operation, payload } => {
                assert_eq!(operation, "signal");
                assert_eq!(payload.as_deref(), Some(r#"{"signal": 15}"#));
            }
            Commands::Arsenal => panic!("expected fire"),
        }
    }
}
