//! Multi-agent task orchestrator.
//!
//! Keeps a dependency-aware task queue on a dedicated branch of a remote git
//! repository and hands tasks out to agents, each in its own worktree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orchestrate::claim::{ClaimOutcome, ClaimRequest, LaunchMode, claim_next, default_owner};
use orchestrate::core::types::{NewTask, TaskStatus};
use orchestrate::exit_codes;
use orchestrate::io::config::{OrchestrateConfig, load_config};
use orchestrate::io::init::{InitOptions, init_workspace};
use orchestrate::io::paths::{ProjectPaths, find_project_root};
use orchestrate::io::run_registry::{self, DEFAULT_TAIL_LINES};
use orchestrate::io::state_store::{GitStateStore, StateStore};
use orchestrate::io::supervisor::ProcessLauncher;
use orchestrate::{logging, monitor, tasks};

#[derive(Parser)]
#[command(
    name = "orchestrate",
    version,
    about = "Coordinate coding agents over a shared git task queue"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone a repository into a new workspace and create the state branch.
    Init(InitArgs),
    /// Manage tasks in the queue.
    #[command(subcommand)]
    Task(TaskCommand),
    /// List tasks in display order.
    List,
    /// Claim the next ready task and create its worktree.
    Next {
        /// Agent to launch once the worktree is ready.
        #[arg(long)]
        agent: Option<String>,
        /// Run the agent attached to this terminal.
        #[arg(long, conflicts_with = "background")]
        run: bool,
        /// Start the agent detached and record the run.
        #[arg(long)]
        background: bool,
    },
    /// Inspect and start background agent runs.
    #[command(subcommand)]
    Agent(AgentCommand),
    /// Print in-progress tasks with their latest run as JSON.
    Overview {
        /// Log lines per run (clamped to 10..=300).
        #[arg(long)]
        lines: Option<usize>,
    },
}

#[derive(Args)]
struct InitArgs {
    /// Repository URL or path.
    repo: String,
    /// Workspace directory (defaults to the repository name).
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Allow setup commands to run in new worktrees.
    #[arg(long)]
    trust: bool,
    /// Custom setup command (requires --trust).
    #[arg(long)]
    setup: Option<String>,
    /// `key=value` git config applied to the clone. Repeatable.
    #[arg(long = "git-config", value_name = "KEY=VALUE")]
    git_config: Vec<String>,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Add a task.
    Add {
        title: String,
        #[arg(long = "desc")]
        description: Option<String>,
        /// Comma-separated ids this task depends on.
        #[arg(long, value_delimiter = ',')]
        deps: Vec<u64>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
    },
    /// Delete a task no other task depends on.
    Delete { id: u64 },
    /// Remove a task's worktree, keeping its branch.
    Remove { id: u64 },
    /// Set a task's status (todo, in_progress, done, blocked).
    Status { id: u64, status: TaskStatus },
}

#[derive(Subcommand)]
enum AgentCommand {
    /// List recorded runs, newest first.
    List,
    /// Show the tail of a task's latest run log.
    Logs {
        task_id: u64,
        #[arg(long, default_value_t = DEFAULT_TAIL_LINES)]
        lines: usize,
    },
    /// Start an agent in the background for a claimed task.
    Start { task_id: u64, agent: String },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init(args) => cmd_init(&cwd, args),
        Command::Task(command) => cmd_task(&cwd, command),
        Command::List => cmd_list(&cwd),
        Command::Next {
            agent,
            run,
            background,
        } => cmd_next(&cwd, agent, run, background),
        Command::Agent(command) => cmd_agent(&cwd, command),
        Command::Overview { lines } => cmd_overview(&cwd, lines),
    }
}

struct Workspace {
    paths: ProjectPaths,
    config: OrchestrateConfig,
}

impl Workspace {
    fn open(cwd: &Path) -> Result<Self> {
        let root = find_project_root(cwd)?;
        let paths = ProjectPaths::new(root);
        let config = load_config(&paths.config_path)?;
        Ok(Self { paths, config })
    }

    fn store(&self) -> GitStateStore {
        GitStateStore::new(self.paths.clone(), self.config.state_branch.clone())
    }
}

fn cmd_init(cwd: &Path, args: InitArgs) -> Result<i32> {
    let report = init_workspace(
        cwd,
        &InitOptions {
            repo: args.repo,
            dir: args.dir,
            trust: args.trust,
            setup: args.setup,
            clone_config: args.git_config,
        },
    )?;
    println!(
        "Initialized workspace at {} (default branch {}, state branch {})",
        report.root.display(),
        report.default_branch,
        report.state_branch
    );
    Ok(exit_codes::OK)
}

fn cmd_task(cwd: &Path, command: TaskCommand) -> Result<i32> {
    let workspace = Workspace::open(cwd)?;
    let store = workspace.store();
    match command {
        TaskCommand::Add {
            title,
            description,
            deps,
            priority,
        } => {
            let id = tasks::add(
                &store,
                &NewTask {
                    title,
                    description,
                    deps,
                    priority,
                },
            )?;
            println!("Added task {id}");
        }
        TaskCommand::Delete { id } => {
            tasks::delete(&store, &workspace.paths, id)?;
            println!("Deleted task {id}");
        }
        TaskCommand::Remove { id } => {
            let worktree = tasks::remove_worktree(&store, &workspace.paths, id)?;
            println!("Removed worktree {worktree} for task {id}");
        }
        TaskCommand::Status { id, status } => {
            if tasks::update_status(&store, id, status)? {
                println!("Task {id} is now {status}");
            } else {
                println!("Task {id} is already {status}");
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_list(cwd: &Path) -> Result<i32> {
    let workspace = Workspace::open(cwd)?;
    let state = workspace.store().read_fresh()?;
    println!("{}", tasks::format_task_list(&state.tasks));
    Ok(exit_codes::OK)
}

fn cmd_next(cwd: &Path, agent: Option<String>, run: bool, background: bool) -> Result<i32> {
    let workspace = Workspace::open(cwd)?;
    let launch = match (run, background) {
        (true, _) => LaunchMode::Foreground,
        (false, true) => LaunchMode::Background,
        (false, false) => LaunchMode::None,
    };
    let request = ClaimRequest {
        owner: default_owner(),
        agent,
        launch,
    };
    let outcome = claim_next(
        &workspace.store(),
        &workspace.paths,
        &workspace.config,
        &ProcessLauncher,
        &request,
    )?;
    match outcome {
        ClaimOutcome::NoTask => {
            println!("No eligible tasks to claim.");
            Ok(exit_codes::NO_TASK)
        }
        ClaimOutcome::Claimed(claimed) => {
            println!(
                "Claimed task {} in {}",
                claimed.task.id,
                claimed.worktree_path.display()
            );
            if let Some(run) = &claimed.run {
                println!("Started run {} (pid {}) log: {}", run.id, run.pid, run.log_path);
            }
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_agent(cwd: &Path, command: AgentCommand) -> Result<i32> {
    let workspace = Workspace::open(cwd)?;
    match command {
        AgentCommand::List => {
            let runs = run_registry::list(&workspace.paths)?;
            let state = workspace.store().read()?;
            println!("{}", monitor::format_run_list(&runs, &state.tasks));
        }
        AgentCommand::Logs { task_id, lines } => {
            let runs = run_registry::list(&workspace.paths)?;
            println!("{}", monitor::task_log_report(&runs, task_id, lines)?);
        }
        AgentCommand::Start { task_id, agent } => {
            let state = workspace.store().read_fresh()?;
            let run = monitor::start_agent(
                &workspace.paths,
                &workspace.config,
                &ProcessLauncher,
                &state.tasks,
                task_id,
                &agent,
            )?;
            println!(
                "Started run {} for task {} (pid {}) log: {}",
                run.id, task_id, run.pid, run.log_path
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_overview(cwd: &Path, lines: Option<usize>) -> Result<i32> {
    let workspace = Workspace::open(cwd)?;
    let state = workspace.store().read_fresh()?;
    let runs = run_registry::list(&workspace.paths)?;
    let overview = monitor::build_overview(
        &workspace.paths,
        &state.tasks,
        &runs,
        monitor::overview_lines(lines),
    )?;
    let payload = serde_json::to_string_pretty(&overview).context("serialize overview")?;
    println!("{payload}");
    Ok(exit_codes::OK)
}
