//! Global configuration parsing, validation, and environment overrides.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable daemon configuration.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable overriding [`GlobalConfig::socket_path`].
pub const SOCKET_ENV: &str = "AGENTBENCH_SOCKET";
/// Environment variable overriding [`GlobalConfig::state_dir`].
pub const STATE_DIR_ENV: &str = "AGENTBENCH_STATE_DIR";
/// Environment variable naming the llama.cpp server behind `claude_local`.
pub const LOCAL_BASE_URL_ENV: &str = "LLAMACPP_BASE_URL";
/// llama.cpp endpoint used by `claude_local` when [`LOCAL_BASE_URL_ENV`] is unset.
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:8080";
/// Model alias `claude_local` passes when a start names none.
pub const DEFAULT_LOCAL_MODEL: &str = "claude-sonnet-4-20250514";

/// Timeouts and polling intervals, all in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Upper bound for every external `git`/`tmux` invocation.
    #[serde(default = "default_command_seconds")]
    pub command_seconds: u64,
    /// Delay between SIGTERM and SIGKILL when stopping a session.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
    /// Interval between background liveness sweeps.
    #[serde(default = "default_liveness_interval_seconds")]
    pub liveness_interval_seconds: u64,
    /// Per-call deadline applied by the remote proxy.
    #[serde(default = "default_client_call_seconds")]
    pub client_call_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_seconds: default_command_seconds(),
            grace_period_seconds: default_grace_period_seconds(),
            liveness_interval_seconds: default_liveness_interval_seconds(),
            client_call_seconds: default_client_call_seconds(),
        }
    }
}

/// Terminal multiplexer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TmuxConfig {
    /// When false, agents run detached with no pane.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prefix for generated tmux session names.
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_prefix: default_session_prefix(),
        }
    }
}

/// Launch recipe for one agent backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Executable name or path.
    pub program: String,
    /// Fixed leading arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag preceding the prompt; `None` passes the prompt positionally.
    #[serde(default)]
    pub prompt_flag: Option<String>,
    /// Whether the prompt is passed on the command line at all.
    #[serde(default = "default_true")]
    pub pass_prompt: bool,
    /// Flag preceding the model override.
    #[serde(default)]
    pub model_flag: Option<String>,
    /// Model passed when a start request names none.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Flag preceding the session id, for backends that accept one.
    #[serde(default)]
    pub session_flag: Option<String>,
    /// Extra environment variables for the agent process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentConfig {
    /// Build the argument vector (excluding the program) for a launch.
    #[must_use]
    pub fn command_args(
        &self,
        session_id: &str,
        model: Option<&str>,
        prompt: Option<&str>,
    ) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(flag) = &self.session_flag {
            args.push(flag.clone());
            args.push(session_id.to_owned());
        }
        let model = model.or(self.default_model.as_deref());
        if let (Some(flag), Some(model)) = (&self.model_flag, model) {
            args.push(flag.clone());
            args.push(model.to_owned());
        }
        if let (true, Some(prompt)) = (self.pass_prompt, prompt) {
            if let Some(flag) = &self.prompt_flag {
                args.push(flag.clone());
            }
            args.push(prompt.to_owned());
        }
        args
    }
}

fn default_true() -> bool {
    true
}

fn default_command_seconds() -> u64 {
    30
}

fn default_grace_period_seconds() -> u64 {
    5
}

fn default_liveness_interval_seconds() -> u64 {
    5
}

fn default_client_call_seconds() -> u64 {
    120
}

fn default_session_prefix() -> String {
    "ab".into()
}

fn default_max_concurrent_sessions() -> u32 {
    8
}

fn default_agent() -> String {
    "claude_code".into()
}

fn default_base_ref() -> String {
    "HEAD".into()
}

fn default_state_dir() -> PathBuf {
    home_dir()
        .map_or_else(|| PathBuf::from(".agentbench"), |home| {
            home.join(".local").join("share").join("agentbench")
        })
}

fn default_socket_path() -> PathBuf {
    match env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("agentbench.sock"),
        _ => PathBuf::from(format!("/tmp/agentbench-{}.sock", current_uid())),
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

/// Built-in agent backends; entries in the config file override these by name.
fn default_agents() -> HashMap<String, AgentConfig> {
    let mut agents = HashMap::new();
    agents.insert(
        "claude_code".to_owned(),
        AgentConfig {
            program: "claude".into(),
            args: vec!["--permission-mode".into(), "bypassPermissions".into()],
            prompt_flag: None,
            pass_prompt: true,
            model_flag: Some("--model".into()),
            default_model: None,
            session_flag: Some("--session-id".into()),
            env: HashMap::new(),
        },
    );
    // Claude Code pointed at a local llama.cpp server.
    let base_url = env::var(LOCAL_BASE_URL_ENV)
        .ok()
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_LOCAL_BASE_URL.to_owned());
    agents.insert(
        "claude_local".to_owned(),
        AgentConfig {
            program: "claude".into(),
            args: vec!["--permission-mode".into(), "bypassPermissions".into()],
            prompt_flag: None,
            pass_prompt: true,
            model_flag: Some("--model".into()),
            default_model: Some(DEFAULT_LOCAL_MODEL.into()),
            session_flag: Some("--session-id".into()),
            env: HashMap::from([
                ("ANTHROPIC_BASE_URL".to_owned(), base_url),
                ("ANTHROPIC_AUTH_TOKEN".to_owned(), "local".to_owned()),
                ("ANTHROPIC_API_KEY".to_owned(), String::new()),
            ]),
        },
    );
    agents.insert(
        "opencode".to_owned(),
        AgentConfig {
            program: "opencode".into(),
            args: Vec::new(),
            prompt_flag: Some("--prompt".into()),
            pass_prompt: true,
            model_flag: Some("--model".into()),
            default_model: None,
            session_flag: None,
            env: HashMap::new(),
        },
    );
    agents
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// Expand a leading `~/` against `$HOME`.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Unix socket the daemon listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Explicit pid file location; defaults under `state_dir`.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    /// Directory holding the session database.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Backend used when a start request names none.
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// Repository used when a start request names none.
    #[serde(default)]
    pub default_repo: Option<PathBuf>,
    /// Parent directory for worktrees; defaults to `<repo>-worktrees` beside the repo.
    #[serde(default)]
    pub worktree_root: Option<PathBuf>,
    /// Reference new session branches are cut from.
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
    /// Maximum sessions in `starting`, `running` or `paused` at once.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Terminal multiplexer configuration.
    #[serde(default)]
    pub tmux: TmuxConfig,
    /// Agent backends keyed by tag.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pid_file: None,
            state_dir: default_state_dir(),
            default_agent: default_agent(),
            default_repo: None,
            worktree_root: None,
            base_ref: default_base_ref(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            timeouts: TimeoutConfig::default(),
            tmux: TmuxConfig::default(),
            agents: default_agents(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, merge built-in agents and
    /// normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        for (name, agent) in default_agents() {
            config.agents.entry(name).or_insert(agent);
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGENTBENCH_SOCKET` and `AGENTBENCH_STATE_DIR` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(socket) = env::var_os(SOCKET_ENV).filter(|v| !v.is_empty()) {
            self.socket_path = expand_home(Path::new(&socket));
        }
        if let Some(dir) = env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.state_dir = expand_home(Path::new(&dir));
        }
    }

    /// Path of the `SQLite` session database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("agentbench.db")
    }

    /// Path of the daemon pid file.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| self.state_dir.join("agentbench.pid"))
    }

    /// Look up an agent backend by tag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidParams` if no backend has that tag.
    pub fn agent(&self, tag: &str) -> Result<&AgentConfig> {
        self.agents
            .get(tag)
            .ok_or_else(|| AppError::InvalidParams(format!("unknown agent backend '{tag}'")))
    }

    /// Deadline for one external command.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.command_seconds)
    }

    /// Delay between graceful and forced termination.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.timeouts.grace_period_seconds)
    }

    /// Interval between liveness sweeps.
    #[must_use]
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.timeouts.liveness_interval_seconds)
    }

    /// Per-call deadline for remote proxy calls.
    #[must_use]
    pub fn client_call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.client_call_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be greater than zero".into(),
            ));
        }

        let timeouts = &self.timeouts;
        if timeouts.command_seconds == 0
            || timeouts.grace_period_seconds == 0
            || timeouts.liveness_interval_seconds == 0
            || timeouts.client_call_seconds == 0
        {
            return Err(AppError::Config("timeouts must be greater than zero".into()));
        }

        if self.tmux.session_prefix.trim().is_empty() {
            return Err(AppError::Config("tmux.session_prefix must not be empty".into()));
        }

        if let Some((name, _)) = self.agents.iter().find(|(_, a)| a.program.trim().is_empty()) {
            return Err(AppError::Config(format!(
                "agents.{name}.program must not be empty"
            )));
        }

        if !self.agents.contains_key(&self.default_agent) {
            return Err(AppError::Config(format!(
                "default_agent '{}' is not a configured agent",
                self.default_agent
            )));
        }

        self.socket_path = expand_home(&self.socket_path);
        self.state_dir = expand_home(&self.state_dir);
        self.pid_file = self.pid_file.as_deref().map(expand_home);
        self.default_repo = self.default_repo.as_deref().map(expand_home);
        self.worktree_root = self.worktree_root.as_deref().map(expand_home);

        Ok(())
    }
}
