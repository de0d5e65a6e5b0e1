//! Entry point for the `vellum` CLI tool.
//!
//! Thin front end over the core engine: init/add/commit/log locally,
//! push/fetch/pull against a vellum server resolved from the remotes
//! config.

mod remotes;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use vellum_core::protocol::DEFAULT_IO_TIMEOUT;
use vellum_core::repository::{Repository, DEFAULT_BRANCH, META_DIR};
use vellum_core::sync::{self, FetchOutcome, PullOutcome, PushOutcome};
use vellum_core::{Head, Remote};

use remotes::Remotes;

#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(author = "Vellum Contributors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal distributed version-control tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a repository in the current directory
    Init {
        /// Initial branch name
        #[arg(long, default_value = DEFAULT_BRANCH)]
        branch: String,
    },

    /// Stage files for the next commit
    Add {
        /// Files to stage
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Commit the staged files
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Show commit history
    Log,

    /// Manage remotes
    Remote {
        #[command(subcommand)]
        action: Option<RemoteAction>,
    },

    /// Push the current branch to a remote
    Push {
        /// Remote name
        remote: String,
    },

    /// Fetch new commits from a remote
    Fetch {
        /// Remote name
        remote: String,
    },

    /// Fetch, fast-forward and update the working tree
    Pull {
        /// Remote name
        remote: String,
    },
}

#[derive(Subcommand, Debug)]
enum RemoteAction {
    /// Add a remote (e.g. tcp://host:7421/project)
    Add { name: String, url: String },
    /// Remove a remote
    Remove { name: String },
    /// List remotes
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { branch } => cmd_init(branch),
        Commands::Add { paths } => cmd_add(paths),
        Commands::Commit { message } => cmd_commit(message),
        Commands::Log => cmd_log(),
        Commands::Remote { action } => cmd_remote(action),
        Commands::Push { remote } => cmd_push(remote).await,
        Commands::Fetch { remote } => cmd_fetch(remote).await,
        Commands::Pull { remote } => cmd_pull(remote).await,
    }
}

fn open_repo() -> Result<Repository> {
    let cwd = std::env::current_dir()?;
    Repository::discover(&cwd)
        .map_err(|_| anyhow::anyhow!("not a vellum repository (run `vellum init` first)"))
}

fn cmd_init(branch: String) -> Result<()> {
    let cwd = std::env::current_dir()?;
    if cwd.join(META_DIR).join("HEAD").is_file() {
        println!("Repository already initialized at {}", cwd.join(META_DIR).display());
        return Ok(());
    }
    Repository::init_work_tree(&cwd, &branch)?;
    println!(
        "Initialized empty vellum repository in {}",
        cwd.join(META_DIR).display()
    );
    Ok(())
}

fn cmd_add(paths: Vec<PathBuf>) -> Result<()> {
    let repo = open_repo()?;
    let mut failures = 0usize;
    for path in &paths {
        let result = fs::canonicalize(path)
            .map_err(vellum_core::Error::from)
            .and_then(|abs| repo.stage(&abs));
        match result {
            Ok(id) => println!("added {} as {}", path.display(), id.short()),
            Err(e) => {
                eprintln!("error adding {}: {e}", path.display());
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("failed to add {failures} path(s)");
    }
    Ok(())
}

fn cmd_commit(message: String) -> Result<()> {
    let repo = open_repo()?;
    if repo.staged()?.is_empty() {
        bail!("nothing to commit (stage files with `vellum add` first)");
    }
    let id = repo.commit(&message)?;
    match repo.refs().head()? {
        Head::Branch(branch) => println!("[{branch} {}] {message}", id.short()),
        Head::Detached(_) => println!("[detached HEAD {}] {message}", id.short()),
    }
    Ok(())
}

fn cmd_log() -> Result<()> {
    let repo = open_repo()?;
    let history = repo.log()?;
    if history.is_empty() {
        println!("no commits yet");
        return Ok(());
    }
    for (id, commit) in history {
        println!("commit {id}");
        match DateTime::<Utc>::from_timestamp(commit.timestamp, 0) {
            Some(date) => println!("Date:   {}", date.format("%Y-%m-%dT%H:%M:%SZ")),
            None => println!("Date:   (invalid timestamp {})", commit.timestamp),
        }
        println!();
        println!("    {}", commit.message);
        println!();
        for entry in &commit.manifest {
            println!("    {}", entry.path);
        }
    }
    Ok(())
}

fn cmd_remote(action: Option<RemoteAction>) -> Result<()> {
    let repo = open_repo()?;
    let mut remotes = Remotes::load(&repo.config_path())?;
    match action.unwrap_or(RemoteAction::List) {
        RemoteAction::Add { name, url } => {
            remotes::parse_url(&url)?;
            remotes.add(&name, &url);
            remotes.save()?;
        }
        RemoteAction::Remove { name } => {
            if !remotes.remove(&name) {
                bail!("no such remote '{name}'");
            }
            remotes.save()?;
        }
        RemoteAction::List => {
            for (name, url) in remotes.iter() {
                println!("{name}\t{url}");
            }
        }
    }
    Ok(())
}

fn resolve_remote(repo: &Repository, name: &str) -> Result<Remote> {
    let remotes = Remotes::load(&repo.config_path())?;
    let url = remotes
        .get(name)
        .with_context(|| format!("no such remote '{name}'"))?;
    remotes::parse_url(url)
}

async fn cmd_push(remote_name: String) -> Result<()> {
    let repo = open_repo()?;
    let remote = resolve_remote(&repo, &remote_name)?;
    let branch = repo.refs().current_branch()?;
    let outcome = sync::push(&repo, &remote, &branch, DEFAULT_IO_TIMEOUT)
        .await
        .with_context(|| format!("push to '{remote_name}' failed"))?;
    match outcome {
        PushOutcome::UpToDate => println!("Everything up-to-date."),
        PushOutcome::Pushed { commits, objects } => {
            println!("Pushed {commits} commit(s) ({objects} object(s)) to {remote_name}.")
        }
    }
    Ok(())
}

async fn cmd_fetch(remote_name: String) -> Result<()> {
    let repo = open_repo()?;
    let remote = resolve_remote(&repo, &remote_name)?;
    let branch = repo.refs().current_branch()?;
    let outcome = sync::fetch(&repo, &remote, &branch, DEFAULT_IO_TIMEOUT)
        .await
        .with_context(|| format!("fetch from '{remote_name}' failed"))?;
    match outcome {
        FetchOutcome::UpToDate => println!("Already up to date."),
        FetchOutcome::Fetched { commits } => {
            println!("Fetched {commits} commit(s); run `vellum pull` to update the working tree.")
        }
    }
    Ok(())
}

async fn cmd_pull(remote_name: String) -> Result<()> {
    let repo = open_repo()?;
    let remote = resolve_remote(&repo, &remote_name)?;
    let branch = repo.refs().current_branch()?;
    let outcome = sync::pull(&repo, &remote, &branch, DEFAULT_IO_TIMEOUT)
        .await
        .with_context(|| format!("pull from '{remote_name}' failed"))?;
    match outcome {
        PullOutcome::UpToDate => println!("Already up to date."),
        PullOutcome::FastForwarded {
            tip,
            commits,
            files,
        } => println!(
            "Updated {branch} to {} ({files} file(s) from {commits} commit(s)).",
            tip.short()
        ),
    }
    Ok(())
}
