//! Session orchestration: the lifecycle controller, startup
//! reconciliation and the background liveness monitor.

pub mod controller;
pub mod liveness;
pub mod reconcile;

tokio::task_local! {
    /// Connection id of the client whose request is being served on the
    /// current task. State changes made outside such a scope (liveness,
    /// restore) carry no origin and reach every client.
    pub static REQUEST_ORIGIN: u64;
}
