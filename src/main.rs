use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use writeflow::{
    Config, Database, Phase, ProjectDocument, Result, Scope, WriteflowError, AUTO_SAVE, MANUAL_SAVE,
};

#[derive(Parser, Debug)]
#[command(name = "writeflow")]
#[command(author, version, about = "Persistence and versioning engine for guided writing projects")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug output to stderr (otherwise RUST_LOG, default warn)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Which learner's copy of which activity to operate on
#[derive(Args, Debug, Clone, Copy)]
struct ScopeArgs {
    /// Activity (project) id
    #[arg(short = 'p', long = "project")]
    project: i32,

    /// Learner (user) id
    #[arg(short = 'u', long = "user")]
    user: i32,
}

impl From<ScopeArgs> for Scope {
    fn from(args: ScopeArgs) -> Self {
        Scope::new(args.project, args.user)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .writeflow/ with a default config and database
    Init,

    /// Manage writing activities
    Activity {
        #[command(subcommand)]
        command: ActivityCommand,
    },

    /// Manage learners
    Learner {
        #[command(subcommand)]
        command: LearnerCommand,
    },

    /// Print the project document
    Load {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Save a project document read from a file ("-" for stdin)
    Save {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(short, long)]
        file: PathBuf,

        /// Record as a manual save (always snapshots text)
        #[arg(long)]
        manual: bool,
    },

    /// Mark the project submitted; later saves are rejected
    Submit {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Return a submitted project to draft
    Reopen {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Delete ideas explicitly
    Idea {
        #[command(subcommand)]
        command: IdeaCommand,
    },

    /// Chat sessions and messages
    Chat {
        #[command(subcommand)]
        command: ChatCommand,
    },

    /// Version history of the write and edit phases
    Versions {
        #[command(subcommand)]
        command: VersionsCommand,
    },

    /// Legacy single-blob project data
    Legacy {
        #[command(subcommand)]
        command: LegacyCommand,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ActivityCommand {
    /// Register an activity and print its project id
    Add {
        name: String,

        /// Instructor instructions shown to every learner
        #[arg(short, long, default_value = "")]
        instructions: String,
    },
    /// Delete an activity and every learner's data under it
    Delete {
        #[arg(short = 'p', long = "project")]
        project: i32,
    },
}

#[derive(Subcommand, Debug)]
enum LearnerCommand {
    /// Register a learner and print their user id
    Add { name: String },
}

#[derive(Subcommand, Debug)]
enum IdeaCommand {
    /// Delete by persisted id
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,
        id: i32,
    },
    /// Delete the idea matching content, location and section
    DeleteByFields {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(short, long)]
        content: String,

        /// brainstorm or outline
        #[arg(short, long, default_value = "brainstorm")]
        location: String,

        #[arg(short, long)]
        section: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ChatCommand {
    /// Start a new active session
    New {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(short, long)]
        title: Option<String>,
    },
    /// List sessions, oldest first
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Make a session the active one
    Switch {
        #[command(flatten)]
        scope: ScopeArgs,
        session: String,
    },
    /// Delete a session and its messages
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,
        session: String,
    },
    Rename {
        #[command(flatten)]
        scope: ScopeArgs,
        session: String,
        title: String,
    },
    /// Print a session's messages in timestamp order
    Messages {
        #[command(flatten)]
        scope: ScopeArgs,
        session: String,
    },
    /// Append one message (to the active session unless --session names one)
    Append {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(short, long)]
        session: Option<String>,

        /// user, assistant or system
        #[arg(short, long)]
        role: String,

        #[arg(short, long)]
        content: String,

        /// Epoch seconds, epoch milliseconds or ISO-8601 (default: now)
        #[arg(short, long)]
        timestamp: Option<String>,
    },
    /// Remove every message in a session
    Clear {
        #[command(flatten)]
        scope: ScopeArgs,
        session: String,
    },
}

#[derive(Subcommand, Debug)]
enum VersionsCommand {
    /// List snapshots, newest first
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, default_value = "write")]
        phase: Phase,

        #[arg(short = 'n', long)]
        limit: Option<i64>,
    },
    Show {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, default_value = "write")]
        phase: Phase,

        number: i32,
    },
    /// Copy a snapshot back into the current text
    Restore {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, default_value = "write")]
        phase: Phase,

        number: i32,
    },
}

#[derive(Subcommand, Debug)]
enum LegacyCommand {
    /// Store a legacy JSON blob for a scope ("-" reads stdin)
    Import {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(short, long)]
        file: PathBuf,
    },
    /// Replay the blob into the normalized tables
    Migrate {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Drop migrated rows and fall back to the blob
    Rollback {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = if verbose {
        EnvFilter::new(default_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| WriteflowError::Validation(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| WriteflowError::Validation(format!("could not read stdin: {}", e)))?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .map_err(|e| WriteflowError::Validation(format!("could not read {}: {}", path.display(), e)))
}

/// Numeric timestamps stay numbers so millisecond detection applies
fn timestamp_arg(raw: &str) -> Value {
    match raw.trim().parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(raw),
    }
}

fn open_db(config: &Config) -> Result<Database> {
    Database::open(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load();

    match cli.command {
        Command::Init => {
            let cwd = std::env::current_dir()
                .map_err(|e| WriteflowError::Config(format!("could not get current directory: {}", e)))?;
            print_json(&writeflow::init::init_store(&cwd)?)
        }

        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "writeflow", &mut std::io::stdout());
            Ok(())
        }

        Command::Activity { command } => {
            let db = open_db(&config)?;
            match command {
                ActivityCommand::Add { name, instructions } => {
                    let project_id = db.register_activity(&name, &instructions)?;
                    print_json(&json!({ "projectId": project_id }))
                }
                ActivityCommand::Delete { project } => print_json(&db.delete_activity(project)?),
            }
        }

        Command::Learner {
            command: LearnerCommand::Add { name },
        } => {
            let user_id = open_db(&config)?.register_learner(&name)?;
            print_json(&json!({ "userId": user_id }))
        }

        Command::Load { scope } => print_json(&open_db(&config)?.load_project(scope.into())?),

        Command::Save { scope, file, manual } => {
            let doc = ProjectDocument::from_json(&read_input(&file)?)?;
            let summary = if manual { MANUAL_SAVE } else { AUTO_SAVE };
            print_json(&open_db(&config)?.save_project_with_summary(scope.into(), &doc, summary)?)
        }

        Command::Submit { scope } => {
            let changed = open_db(&config)?.submit_project(scope.into())?;
            print_json(&json!({ "ok": true, "changed": changed }))
        }

        Command::Reopen { scope } => {
            let changed = open_db(&config)?.reopen_project(scope.into())?;
            print_json(&json!({ "ok": changed }))
        }

        Command::Idea { command } => {
            let db = open_db(&config)?;
            let deleted = match command {
                IdeaCommand::Delete { scope, id } => db.delete_idea(scope.into(), id),
                IdeaCommand::DeleteByFields {
                    scope,
                    content,
                    location,
                    section,
                } => db.delete_idea_by_fields(scope.into(), &content, &location, section.as_deref()),
            };
            print_json(&json!({ "ok": deleted }))
        }

        Command::Chat { command } => run_chat(&open_db(&config)?, command),

        Command::Versions { command } => {
            let db = open_db(&config)?;
            match command {
                VersionsCommand::List { scope, phase, limit } => {
                    print_json(&db.get_version_history(scope.into(), phase, limit)?)
                }
                VersionsCommand::Show { scope, phase, number } => {
                    let version = db.get_version(scope.into(), phase, number)?.ok_or_else(|| {
                        WriteflowError::NotFound(format!("{} version {}", phase, number))
                    })?;
                    print_json(&version)
                }
                VersionsCommand::Restore { scope, phase, number } => {
                    let version = db.restore_version(scope.into(), phase, number)?;
                    print_json(&json!({ "ok": true, "versionNumber": version }))
                }
            }
        }

        Command::Legacy { command } => {
            let db = open_db(&config)?;
            match command {
                LegacyCommand::Import { scope, file } => {
                    db.import_legacy_blob(scope.into(), &read_input(&file)?)?;
                    print_json(&json!({ "ok": true }))
                }
                LegacyCommand::Migrate { scope } => print_json(&db.migrate(scope.into())?),
                LegacyCommand::Rollback { scope } => {
                    let removed = db.rollback(scope.into())?;
                    print_json(&json!({ "ok": true, "removed": removed }))
                }
            }
        }
    }
}

fn run_chat(db: &Database, command: ChatCommand) -> Result<()> {
    match command {
        ChatCommand::New { scope, title } => {
            let session_id = db.create_session(scope.into(), title.as_deref())?;
            print_json(&json!({ "sessionId": session_id }))
        }
        ChatCommand::List { scope } => print_json(&db.get_sessions(scope.into())?),
        ChatCommand::Switch { scope, session } => {
            print_json(&json!({ "ok": db.switch_to_session(scope.into(), &session) }))
        }
        ChatCommand::Delete { scope, session } => {
            print_json(&json!({ "ok": db.delete_session(scope.into(), &session) }))
        }
        ChatCommand::Rename { scope, session, title } => {
            print_json(&json!({ "ok": db.update_session_title(scope.into(), &session, &title) }))
        }
        ChatCommand::Messages { scope, session } => print_json(&db.get_session_messages(scope.into(), &session)?),
        ChatCommand::Append {
            scope,
            session,
            role,
            content,
            timestamp,
        } => {
            let timestamp = timestamp.as_deref().map(timestamp_arg);
            let appended = db.append_message(scope.into(), session.as_deref(), &role, &content, timestamp.as_ref())?;
            print_json(&appended)
        }
        ChatCommand::Clear { scope, session } => {
            let removed = db.clear_session_messages(scope.into(), &session)?;
            print_json(&json!({ "ok": true, "removed": removed }))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(if e.is_client_error() { 2 } else { 1 });
    }
}
