//! Store initialization
//!
//! `writeflow init` creates `.writeflow/` in the current directory with a
//! default `config.toml` and an empty database carrying the current schema.

use crate::config::Config;
use crate::db::{Database, CURRENT_SCHEMA};
use crate::error::{Result, WriteflowError};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const GITIGNORE_ENTRY: &str = ".writeflow/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub ok: bool,
    pub db_path: PathBuf,
    pub schema: String,
}

/// Initialize writeflow under `root`. Progress goes to stderr.
pub fn init_store(root: &Path) -> Result<InitReport> {
    eprintln!("\n{}", "Initializing writeflow...".cyan().bold());
    eprintln!("   Directory: {}\n", root.display());

    let store_dir = root.join(".writeflow");
    create_dir_if_missing(&store_dir)?;

    let config_path = store_dir.join("config.toml");
    let config = if config_path.exists() {
        eprintln!("   {} .writeflow/config.toml (already exists)", "Skipping".yellow());
        let contents = read(&config_path)?;
        toml::from_str::<Config>(&contents)
            .map_err(|e| WriteflowError::Config(format!("{}: {}", config_path.display(), e)))?
    } else {
        let config = Config::default();
        let contents =
            toml::to_string_pretty(&config).map_err(|e| WriteflowError::Config(e.to_string()))?;
        write(&config_path, &contents)?;
        eprintln!("   {} .writeflow/config.toml", "Creating".green());
        config
    };

    // An explicit WRITEFLOW_DB_PATH wins, as it does for every other command
    let db_path = match std::env::var("WRITEFLOW_DB_PATH") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => store_dir.join(config.db_file_name()),
    };
    let existed = db_path.exists();
    Database::open_with_settings(&db_path, config.settings())?;
    let verb = if existed { "Opened".yellow() } else { "Creating".green() };
    eprintln!("   {} {} (schema {})", verb, db_path.display(), CURRENT_SCHEMA);

    add_to_gitignore(root)?;

    eprintln!("\n{}", "writeflow initialized!".green().bold());
    Ok(InitReport {
        ok: true,
        db_path,
        schema: CURRENT_SCHEMA.version_string(),
    })
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| WriteflowError::Config(format!("could not read {}: {}", path.display(), e)))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| WriteflowError::Config(format!("could not write {}: {}", path.display(), e)))
}

fn create_dir_if_missing(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| WriteflowError::Config(format!("could not create {}: {}", path.display(), e)))?;
        eprintln!("   {} {}", "Creating".green(), path.display());
    }
    Ok(())
}

fn add_to_gitignore(root: &Path) -> Result<()> {
    let gitignore_path = root.join(".gitignore");

    if gitignore_path.exists() {
        let existing = read(&gitignore_path)?;
        if existing
            .lines()
            .any(|line| line.trim() == GITIGNORE_ENTRY || line.trim() == ".writeflow")
        {
            return Ok(());
        }
        let new_content = format!("{}\n\n# writeflow store (local)\n{}\n", existing.trim_end(), GITIGNORE_ENTRY);
        write(&gitignore_path, &new_content)?;
        eprintln!("   {} .gitignore (added {})", "Updated".green(), GITIGNORE_ENTRY);
    } else {
        write(&gitignore_path, &format!("# writeflow store (local)\n{}\n", GITIGNORE_ENTRY))?;
        eprintln!("   {} .gitignore", "Creating".green());
    }
    Ok(())
}
