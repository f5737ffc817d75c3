#![forbid(unsafe_code)]

//! `agentbench`: a daemon that runs coding agents in isolated git
//! worktrees and tmux panes, driven over JSON-RPC on a Unix socket.

pub mod api;
pub mod config;
pub mod context;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod resources;
pub mod rpc;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
