//! steria, the CLI collaborator for the Steria storage engine.
//!
//! Thin dispatch over the core operations: commit, status/diff, branching
//! and merging, restore/cherry-pick/rebase, conflicts, tags, remotes and
//! stash. Exit codes: 0 success, 1 usage error, 2 core error, 3 a merge
//! left unresolved conflicts.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use steria_core::{
    diff, hash, ignore, CoreError, MergeOutcome, RebaseAction, RebaseItem, RemoteKind,
    RemoteSpec, Repository, META_DIR,
};

#[derive(Parser)]
#[command(name = "steria", version, about = "Content-addressed version control")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Commit the working tree: done <message> - <signer>
    #[command(alias = "commit")]
    Done {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Show branch, HEAD, remote and pending changes
    Status,
    /// Show line changes for one path or every changed file
    Diff {
        path: Option<String>,
        /// Context lines around each change
        #[arg(long, default_value_t = 3)]
        context: usize,
    },
    /// Create a branch at the current HEAD
    AddBranch { name: String },
    /// Switch to a branch and restore its snapshot
    SwitchBranch { name: String },
    /// Delete a branch ref
    DeleteBranch { name: String },
    /// Rename a branch ref
    RenameBranch { old: String, new: String },
    /// Merge a branch: merge <branch> - <signer>
    Merge {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Restore a file from a commit (HEAD by default)
    Restore {
        path: String,
        commit: Option<String>,
    },
    /// Apply one commit onto the current branch
    CherryPick { commit: String },
    /// Replay a keep/combine/skip plan file
    Rebase { plan: PathBuf },
    /// List unresolved conflicts
    Conflicts,
    /// Mark a conflicted file as resolved
    Resolve { path: String },
    /// Manage remotes
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },
    /// Push local blobs to a remote
    Push { remote: Option<String> },
    /// Pull a remote's blobs into the local store
    Pull { remote: Option<String> },
    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommand,
    },
    /// Show or extend the ignore patterns
    Ignore { pattern: Option<String> },
    /// Show commit history
    Log { count: Option<usize> },
    /// Put working-tree edits aside
    Stash {
        #[command(subcommand)]
        command: StashCommand,
    },
}

#[derive(Subcommand)]
enum RemoteCommand {
    /// Register a remote: remote add <name> <type> <url>
    Add {
        name: String,
        kind: String,
        url: String,
    },
    /// List configured remotes
    List,
}

#[derive(Subcommand)]
enum TagCommand {
    Create {
        name: String,
        commit: Option<String>,
        message: Option<String>,
    },
    List,
    Delete { name: String },
    /// Move HEAD to the tagged commit (detached)
    Checkout { name: String },
}

#[derive(Subcommand)]
enum StashCommand {
    Save {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        message: Vec<String>,
    },
    List,
    Apply { id: u64 },
}

enum CliError {
    Usage(String),
    Core(CoreError),
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "{msg}"),
            Self::Core(err) => write!(f, "{err}"),
        }
    }
}

fn exit_code(err: &CliError) -> i32 {
    match err {
        CliError::Usage(_) => 1,
        CliError::Core(CoreError::MergeConflicts { .. }) => 3,
        CliError::Core(_) => 2,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    if let Err(err) = run(cli.command).await {
        eprintln!("error: {err}");
        std::process::exit(exit_code(&err));
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Done { args } => {
            let (message, signer) = split_signed(&args, "done <message> - <signer>")?;
            let repo = Repository::load_or_init(cwd()?, &signer).await?;
            let commit = repo.create_commit(&message, &signer).await?;
            println!(
                "Committed {} on '{}': {message}",
                commit.short_hash(),
                repo.current_branch()?
            );
        }
        Command::Status => {
            let repo = open_repo()?;
            let status = repo.status().await?;
            println!("On branch {}", status.branch);
            if status.head.is_empty() {
                println!("No commits yet");
            } else {
                println!("HEAD {}", hash::short(&status.head));
            }
            if let Some(remote) = &status.remote {
                println!("Remote {remote}");
            }
            if status.changes.is_empty() {
                println!("Working tree clean");
            } else {
                for change in &status.changes {
                    println!("  {}: {}", change.kind, change.path);
                }
            }
        }
        Command::Diff { path, context } => {
            let repo = open_repo()?;
            let targets = match path {
                Some(path) => vec![path],
                None => repo
                    .changes()
                    .await?
                    .into_iter()
                    .map(|c| c.path)
                    .collect(),
            };
            for path in targets {
                print_file_diff(&repo, &path, context).await?;
            }
        }
        Command::AddBranch { name } => {
            let repo = open_repo()?;
            repo.create_branch(&name)?;
            println!("Created branch '{name}'");
        }
        Command::SwitchBranch { name } => {
            let repo = open_repo()?;
            repo.switch_branch(&name).await?;
            println!("Switched to branch '{name}'");
        }
        Command::DeleteBranch { name } => {
            let repo = open_repo()?;
            repo.delete_branch(&name)?;
            println!("Deleted branch '{name}'");
        }
        Command::RenameBranch { old, new } => {
            let repo = open_repo()?;
            repo.rename_branch(&old, &new)?;
            println!("Renamed branch '{old}' to '{new}'");
        }
        Command::Merge { args } => {
            let (branch, signer) = split_signed(&args, "merge <branch> - <signer>")?;
            if branch.contains(' ') {
                return Err(CliError::Usage("usage: merge <branch> - <signer>".into()));
            }
            let repo = open_repo()?;
            match repo.merge(&branch, &signer).await? {
                MergeOutcome::AlreadyUpToDate => println!("Already up to date"),
                MergeOutcome::FastForward { head } => {
                    println!("Fast-forwarded to {}", hash::short(&head));
                }
                MergeOutcome::Merged { head } => {
                    println!("Merged '{branch}' (now at {})", hash::short(&head));
                }
            }
        }
        Command::Restore { path, commit } => {
            let repo = open_repo()?;
            repo.restore_file(&path, commit.as_deref()).await?;
            println!("Restored {path}");
        }
        Command::CherryPick { commit } => {
            let repo = open_repo()?;
            let picked = repo.cherry_pick(&commit).await?;
            println!("Cherry-picked as {}: {}", picked.short_hash(), picked.message);
        }
        Command::Rebase { plan } => {
            let repo = open_repo()?;
            let items = parse_rebase_plan(&repo, &plan)?;
            let head = repo.rebase(&items).await?;
            println!("Rebased; HEAD is now {}", hash::short(&head));
        }
        Command::Conflicts => {
            let repo = open_repo()?;
            let unresolved = repo.conflicts().list_unresolved()?;
            if unresolved.is_empty() {
                println!("No unresolved conflicts, repository is clean");
            } else {
                println!("Unresolved conflicts:");
                for conflict in unresolved {
                    println!("  {}", conflict.file);
                    if let Some(lines) = &conflict.lines {
                        println!("    lines: {lines:?}");
                    }
                    if let Some(details) = &conflict.details {
                        println!("    {details}");
                    }
                }
            }
        }
        Command::Resolve { path } => {
            let repo = open_repo()?;
            let known = repo
                .conflicts()
                .list_unresolved()?
                .iter()
                .any(|c| c.file == path);
            if !known {
                return Err(CliError::Core(CoreError::not_found("conflict", path)));
            }
            repo.conflicts().resolve(&path, &resolver_identity())?;
            println!("Marked {path} as resolved");
        }
        Command::Remote { command } => match command {
            RemoteCommand::Add { name, kind, url } => {
                let repo = open_repo()?;
                let kind: RemoteKind = kind.parse()?;
                repo.add_remote(RemoteSpec { name: name.clone(), kind, url })?;
                println!("Added remote '{name}'");
            }
            RemoteCommand::List => {
                let repo = open_repo()?;
                let remotes = repo.remotes()?;
                if remotes.is_empty() {
                    println!("No remotes configured");
                }
                for remote in remotes {
                    println!("{}\t{:?}\t{}", remote.name, remote.kind, remote.url);
                }
            }
        },
        Command::Push { remote } => {
            let repo = open_repo()?;
            let spec = select_remote(&repo, remote)?;
            let report = repo.push_to(&spec).await?;
            println!(
                "Pushed {} blob(s) to '{}' ({} already present)",
                report.transferred, spec.name, report.skipped
            );
        }
        Command::Pull { remote } => {
            let repo = open_repo()?;
            let spec = select_remote(&repo, remote)?;
            let report = repo.pull_from(&spec).await?;
            println!(
                "Pulled {} blob(s) from '{}' ({} already present)",
                report.transferred, spec.name, report.skipped
            );
        }
        Command::Tag { command } => match command {
            TagCommand::Create {
                name,
                commit,
                message,
            } => {
                let repo = open_repo()?;
                let tag = repo.create_tag(
                    &name,
                    commit.as_deref(),
                    message.as_deref().unwrap_or(""),
                    &resolver_identity(),
                )?;
                println!("Created tag '{name}' at {}", hash::short(&tag.commit));
            }
            TagCommand::List => {
                let repo = open_repo()?;
                let tags = repo.list_tags()?;
                if tags.is_empty() {
                    println!("No tags");
                }
                for tag in tags {
                    println!("{}\t{}\t{}", tag.name, hash::short(&tag.commit), tag.message);
                }
            }
            TagCommand::Delete { name } => {
                let repo = open_repo()?;
                repo.delete_tag(&name)?;
                println!("Deleted tag '{name}'");
            }
            TagCommand::Checkout { name } => {
                let repo = open_repo()?;
                let tag = repo.checkout_tag(&name)?;
                println!(
                    "Checked out tag '{name}' ({}), HEAD is detached",
                    hash::short(&tag.commit)
                );
            }
        },
        Command::Ignore { pattern } => {
            let repo = open_repo()?;
            match pattern {
                Some(pattern) => {
                    ignore::append_pattern(repo.root(), &pattern)?;
                    println!("Added ignore pattern: {pattern}");
                }
                None => {
                    let rules = ignore::IgnoreRules::load(repo.root())?;
                    for pattern in rules.patterns() {
                        println!("{pattern}");
                    }
                }
            }
        }
        Command::Log { count } => {
            let repo = open_repo()?;
            for commit in repo.log(count.unwrap_or(20))? {
                println!(
                    "{} {} {} {}",
                    commit.short_hash(),
                    commit.timestamp.to_rfc3339(),
                    commit.author,
                    commit.message
                );
            }
        }
        Command::Stash { command } => match command {
            StashCommand::Save { message } => {
                let repo = open_repo()?;
                let entry = repo.stash_save(&message.join(" ")).await?;
                println!("Stashed {} file(s) as #{}", entry.files.len(), entry.id);
            }
            StashCommand::List => {
                let repo = open_repo()?;
                for entry in repo.stash_list()? {
                    println!(
                        "#{} {} ({} file(s)): {}",
                        entry.id,
                        entry.created.to_rfc3339(),
                        entry.files.len(),
                        entry.message
                    );
                }
            }
            StashCommand::Apply { id } => {
                let repo = open_repo()?;
                let entry = repo.stash_apply(id).await?;
                println!("Applied stash #{} ({})", entry.id, entry.message);
            }
        },
    }
    Ok(())
}

/// Split `<words...> - <signer words...>` around the literal `-`
fn split_signed(args: &[String], usage: &str) -> Result<(String, String), CliError> {
    let sep = args
        .iter()
        .position(|a| a == "-")
        .ok_or_else(|| CliError::Usage(format!("usage: {usage}")))?;
    let before = args[..sep].join(" ");
    let after = args[sep + 1..].join(" ");
    if before.is_empty() || after.is_empty() {
        return Err(CliError::Usage(format!("usage: {usage}")));
    }
    Ok((before, after))
}

fn cwd() -> Result<PathBuf, CliError> {
    std::env::current_dir().map_err(|err| CliError::Core(err.into()))
}

/// Walk up from the working directory to the enclosing repository root
fn open_repo() -> Result<Repository, CliError> {
    let start = cwd()?;
    let mut dir: &Path = &start;
    loop {
        if dir.join(META_DIR).join("config.json").is_file() {
            return Ok(Repository::open(dir)?);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(CliError::Core(CoreError::NotARepository(start.clone()))),
        }
    }
}

fn resolver_identity() -> String {
    std::env::var("STERIA_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Pick an explicit remote, the first configured one, or the
/// `STERIA_REMOTE_URL` fallback
fn select_remote(repo: &Repository, name: Option<String>) -> Result<RemoteSpec, CliError> {
    let remotes = repo.remotes()?;
    if let Some(name) = name {
        return remotes
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| CliError::Core(CoreError::not_found("remote", name)));
    }
    if let Some(first) = remotes.into_iter().next() {
        return Ok(first);
    }
    if let Ok(url) = std::env::var("STERIA_REMOTE_URL") {
        return Ok(RemoteSpec {
            name: "default".to_string(),
            kind: RemoteKind::Http,
            url,
        });
    }
    Err(CliError::Usage(
        "no remote configured; add one with 'remote add'".into(),
    ))
}

async fn print_file_diff(
    repo: &Repository,
    path: &str,
    context: usize,
) -> Result<(), CliError> {
    let head = repo.head()?;
    let old = if head.is_empty() {
        Vec::new()
    } else {
        let tip = repo.load_commit(&head)?;
        match tip.file_blobs.get(path) {
            Some(blob_ref) => repo.resolve_blob(blob_ref).await?.to_vec(),
            None => Vec::new(),
        }
    };
    let new = fs::read(repo.root().join(path)).unwrap_or_default();

    let stats = diff::stats(&old, &new);
    println!(
        "{path}: +{} -{} ~{}",
        stats.added, stats.removed, stats.changed
    );
    for line in diff::lines(&old, &new, context) {
        match line {
            diff::DiffLine::Context(no, text) => println!("  {no:>4}  {text}"),
            diff::DiffLine::Added(no, text) => println!("+ {no:>4}  {text}"),
            diff::DiffLine::Removed(no, text) => println!("- {no:>4}  {text}"),
            diff::DiffLine::Separator => println!("  ..."),
        }
    }
    Ok(())
}

/// Parse a rebase plan file: `keep|combine|skip <hash> [message...]` per
/// line, `#` lines ignored. Hashes may be 8-character abbreviations of
/// commits reachable from HEAD.
fn parse_rebase_plan(repo: &Repository, path: &Path) -> Result<Vec<RebaseItem>, CliError> {
    let text = fs::read_to_string(path).map_err(|err| CliError::Core(err.into()))?;
    let known: HashMap<String, String> = repo
        .log(usize::MAX)?
        .into_iter()
        .map(|c| (hash::short(&c.hash).to_string(), c.hash))
        .collect();

    let mut items = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        let action = match words.next() {
            Some("keep") => RebaseAction::Keep,
            Some("combine") => RebaseAction::Combine,
            Some("skip") => RebaseAction::Skip,
            other => {
                return Err(CliError::Usage(format!(
                    "bad rebase action: {}",
                    other.unwrap_or("")
                )))
            }
        };
        let short = words
            .next()
            .ok_or_else(|| CliError::Usage("rebase line missing commit hash".into()))?;
        let full = if hash::is_full_hash(short) {
            short.to_string()
        } else {
            known
                .get(short)
                .cloned()
                .ok_or_else(|| CliError::Usage(format!("unknown commit in plan: {short}")))?
        };
        items.push(RebaseItem {
            action,
            hash: full,
            message: words.collect::<Vec<_>>().join(" "),
        });
    }
    Ok(items)
}
