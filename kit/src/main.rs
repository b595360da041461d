//! `gemini-kit`: run multi-agent workflows and inspect their sessions.
//!
//! Sessions live under `.gemini-kit/sessions/` of the project root; agents
//! are configured as commands in `.gemini-kit/config.toml`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::warn;

use gemini_kit::agents::AgentRegistry;
use gemini_kit::engine::run_workflow;
use gemini_kit::exit_codes;
use gemini_kit::io::config::{KitPaths, load_config};
use gemini_kit::io::find::find_files;
use gemini_kit::io::git::Git;
use gemini_kit::io::paths::validate_path;
use gemini_kit::io::session_store::{SessionStore, StoreOptions};
use gemini_kit::logging;
use gemini_kit::session::{SessionStatus, summarize};
use gemini_kit::workflow::{Workflow, WorkflowRegistry};

#[derive(Parser)]
#[command(
    name = "gemini-kit",
    version,
    about = "Multi-agent workflow runner with persisted team sessions"
)]
struct Cli {
    /// Project root holding `.gemini-kit/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered workflows.
    Workflows,
    /// Print the workflow a task description maps to.
    Select { task: String },
    /// List persisted sessions, most recent first.
    Sessions {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the summary of a persisted session.
    Show { id: String },
    /// List files beneath a directory inside the project root.
    Files {
        dir: PathBuf,
        /// Extensions to keep (repeatable).
        #[arg(long = "ext")]
        extensions: Vec<String>,
        #[arg(long)]
        max: Option<usize>,
    },
    /// Run a workflow for a task in a new session.
    Run {
        task: String,
        /// Workflow name; chosen from the task text when omitted.
        #[arg(long)]
        workflow: Option<String>,
    },
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit_code(exit_codes::INVALID)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(cli: Cli) -> Result<i32> {
    let registry = WorkflowRegistry::builtin();
    match cli.command {
        Command::Workflows => cmd_workflows(&registry),
        Command::Select { task } => cmd_select(&registry, &task),
        Command::Sessions { limit } => cmd_sessions(&cli.root, limit),
        Command::Show { id } => cmd_show(&cli.root, &id),
        Command::Files {
            dir,
            extensions,
            max,
        } => cmd_files(&cli.root, &dir, extensions, max),
        Command::Run { task, workflow } => cmd_run(&cli.root, &registry, &task, workflow.as_deref()),
    }
}

fn cmd_workflows(registry: &WorkflowRegistry) -> Result<i32> {
    for info in registry.list() {
        println!("{:<10} {}", info.name, info.description);
    }
    Ok(exit_codes::OK)
}

fn cmd_select(registry: &WorkflowRegistry, task: &str) -> Result<i32> {
    println!("{}", registry.auto_select(task)?.name);
    Ok(exit_codes::OK)
}

fn open_store(root: &Path) -> Result<SessionStore> {
    let paths = KitPaths::new(root);
    let config = load_config(&paths.config_path)?;
    SessionStore::new(StoreOptions::from_config(&paths, &config))
}

fn cmd_sessions(root: &Path, limit: Option<usize>) -> Result<i32> {
    let store = open_store(root)?;
    for session in store.list_sessions(limit)? {
        println!(
            "{}  {:<9}  {}",
            session.id,
            session.status.as_str(),
            session.name
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_show(root: &Path, id: &str) -> Result<i32> {
    let store = open_store(root)?;
    let session = store
        .load_session(id)?
        .ok_or_else(|| anyhow!("session '{id}' not found"))?;
    print!("{}", summarize(&session));
    Ok(exit_codes::OK)
}

fn cmd_files(root: &Path, dir: &Path, extensions: Vec<String>, max: Option<usize>) -> Result<i32> {
    let paths = KitPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let dir = validate_path(dir, root)?;
    let mut options = config.search;
    if !extensions.is_empty() {
        options.extensions = extensions;
    }
    if let Some(max) = max {
        options.max_files = max;
    }
    for path in find_files(&dir, &options)? {
        println!("{}", path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    root: &Path,
    registry: &WorkflowRegistry,
    task: &str,
    workflow: Option<&str>,
) -> Result<i32> {
    let paths = KitPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let workflow: &Workflow = match workflow {
        Some(name) => registry
            .get(name)
            .with_context(|| format!("unknown workflow '{name}'"))?,
        None => registry.auto_select(task)?,
    };
    let agents = AgentRegistry::from_config(&config);
    let store = SessionStore::new(StoreOptions::from_config(&paths, &config))?;

    let outcome = run_workflow(&store, &agents, workflow, task)?;
    print!("{}", summarize(&outcome.session));
    let git = Git::new(root);
    if git.is_repo() {
        match git.head_summary() {
            Ok(head) => println!("Repository: {head}"),
            Err(err) => warn!(err = %format!("{err:#}"), "could not describe repository"),
        }
    }
    if outcome.session.status == SessionStatus::Failed {
        return Ok(exit_codes::FAILED);
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_workflow() {
        let cli = Cli::parse_from(["gemini-kit", "run", "fix it", "--workflow", "bugfix"]);
        match cli.command {
            Command::Run { task, workflow } => {
                assert_eq!(task, "fix it");
                assert_eq!(workflow.as_deref(), Some("bugfix"));
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_files_with_repeated_ext() {
        let cli = Cli::parse_from([
            "gemini-kit", "--root", "/w", "files", "src", "--ext", "rs", "--ext", "toml",
        ]);
        match cli.command {
            Command::Files {
                dir, extensions, ..
            } => {
                assert_eq!(dir, PathBuf::from("src"));
                assert_eq!(extensions, vec!["rs", "toml"]);
            }
            _ => panic!("expected files"),
        }
        assert_eq!(cli.root, PathBuf::from("/w"));
    }

    #[test]
    fn parse_sessions_limit() {
        let cli = Cli::parse_from(["gemini-kit", "sessions", "--limit", "3"]);
        assert!(matches!(cli.command, Command::Sessions { limit: Some(3) }));
    }
}
