#![forbid(unsafe_code)]

//! `agentbench-ctl`: command-line client for the `agentbench` daemon.
//!
//! Every subcommand is one JSON-RPC call through
//! [`agentbench::rpc::client::RemoteSessionApi`]; results are printed as
//! pretty JSON. `watch` streams state changes until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use agentbench::api::{SessionApi, SessionFilter, StartCodingRequest};
use agentbench::models::session::SessionState;
use agentbench::orchestrator::controller::DEFAULT_OUTPUT_LINES;
use agentbench::rpc::client::{ClientOptions, RemoteSessionApi};
use agentbench::{AppError, GlobalConfig, Result};

const WATCH_PROBE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(
    name = "agentbench-ctl",
    about = "Control coding agent sessions",
    version,
    long_about = None
)]
struct Cli {
    /// Daemon socket. Defaults to `AGENTBENCH_SOCKET`, the config file, or
    /// the built-in location.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Configuration file used to resolve the socket and call timeout.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a session and launch its agent.
    Start {
        /// Owning task identifier.
        task_id: String,
        /// Agent backend tag.
        #[arg(long)]
        agent: Option<String>,
        /// Source repository.
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Base reference for the session branch.
        #[arg(long)]
        base_ref: Option<String>,
        /// Initial instruction for the agent.
        #[arg(long)]
        prompt: Option<String>,
        /// Model override.
        #[arg(long)]
        model: Option<String>,
    },

    /// Terminate a session's agent process.
    Stop {
        /// Session identifier.
        session_id: String,
    },

    /// Suspend a running agent.
    Pause {
        /// Session identifier.
        session_id: String,
    },

    /// Continue a paused agent.
    Resume {
        /// Session identifier.
        session_id: String,
    },

    /// Remove a stopped or failed session's worktree and pane.
    Archive {
        /// Session identifier.
        session_id: String,
    },

    /// List sessions.
    List {
        /// Only sessions of this task.
        #[arg(long)]
        task: Option<String>,
        /// Only sessions in this state (repeatable).
        #[arg(long = "state")]
        states: Vec<String>,
    },

    /// Show one session.
    Get {
        /// Session identifier.
        session_id: String,
    },

    /// Probe a session's process, pane and worktree.
    Liveness {
        /// Session identifier.
        session_id: String,
    },

    /// Print recent pane output.
    Output {
        /// Session identifier.
        session_id: String,
        /// Number of lines.
        #[arg(long, default_value_t = DEFAULT_OUTPUT_LINES)]
        lines: u32,
    },

    /// Type a line into the agent's pane.
    Send {
        /// Session identifier.
        session_id: String,
        /// Text to send.
        text: String,
    },

    /// Print uncommitted changes in the session worktree.
    Diff {
        /// Session identifier.
        session_id: String,
    },

    /// Run a command in the session worktree and print its output.
    Run {
        /// Session identifier.
        session_id: String,
        /// Command line, shell-quoted as one argument.
        command: String,
    },

    /// Check the daemon responds.
    Ping,

    /// Show daemon status.
    Status,

    /// Stream session state changes until interrupted.
    Watch,
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(args)) {
        eprintln!("Error: {err}");
        if matches!(err, AppError::TransportClosed(_)) {
            eprintln!("Is the agentbench daemon running?");
        }
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides();
    let socket = args.socket.unwrap_or_else(|| config.socket_path.clone());

    let options = ClientOptions {
        call_timeout: config.client_call_timeout(),
        ..ClientOptions::default()
    };

    if matches!(args.command, Command::Watch) {
        let client = RemoteSessionApi::connect(socket, options).await?;
        return watch(&client).await;
    }

    let client = RemoteSessionApi::new(socket, options);
    execute(&client, args.command).await
}

async fn execute(api: &dyn SessionApi, command: Command) -> Result<()> {
    match command {
        Command::Start {
            task_id,
            agent,
            repo,
            base_ref,
            prompt,
            model,
        } => print_json(
            &api.start_coding(StartCodingRequest {
                task_id,
                agent,
                repo_path: repo,
                base_ref,
                prompt,
                model,
            })
            .await?,
        ),
        Command::Stop { session_id } => print_json(&api.stop(session_id).await?),
        Command::Pause { session_id } => print_json(&api.pause(session_id).await?),
        Command::Resume { session_id } => print_json(&api.resume(session_id).await?),
        Command::Archive { session_id } => print_json(&api.archive(session_id).await?),
        Command::List { task, states } => {
            let filter = SessionFilter {
                task_id: task,
                states: parse_states(&states)?,
            };
            print_json(&api.list(filter).await?)
        }
        Command::Get { session_id } => print_json(&api.get(session_id).await?),
        Command::Liveness { session_id } => print_json(&api.check_liveness(session_id).await?),
        Command::Output { session_id, lines } => {
            print!("{}", api.get_output(session_id, lines).await?);
            Ok(())
        }
        Command::Send { session_id, text } => {
            api.send_to(session_id, text).await?;
            println!("OK");
            Ok(())
        }
        Command::Diff { session_id } => {
            print!("{}", api.get_diff(session_id).await?);
            Ok(())
        }
        Command::Run {
            session_id,
            command,
        } => {
            print!("{}", api.run_in_worktree(session_id, command).await?);
            Ok(())
        }
        Command::Ping => {
            println!("{}", api.ping().await?);
            Ok(())
        }
        Command::Status => print_json(&api.status().await?),
        Command::Watch => Err(AppError::InvalidRequest(
            "watch needs a persistent connection".into(),
        )),
    }
}

async fn watch(client: &RemoteSessionApi) -> Result<()> {
    let mut changes = client.subscribe();
    client.ping().await?;
    eprintln!("watching session state changes (ctrl-c to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            change = changes.recv() => match change {
                Ok(change) => print_json(&change)?,
                Err(RecvError::Lagged(skipped)) => eprintln!("({skipped} changes skipped)"),
                Err(RecvError::Closed) => return Ok(()),
            },
            () = tokio::time::sleep(WATCH_PROBE_INTERVAL) => {
                if !client.is_connected().await {
                    return Err(AppError::TransportClosed("daemon connection closed".into()));
                }
            }
        }
    }
}

fn parse_states(raw: &[String]) -> Result<Option<Vec<SessionState>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.iter()
        .map(|name| {
            SessionState::parse(name)
                .ok_or_else(|| AppError::InvalidParams(format!("unknown state '{name}'")))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
