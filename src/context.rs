//! Daemon wiring: store, resources, controller and background services.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::SessionApi;
use crate::orchestrator::controller::SessionController;
use crate::orchestrator::liveness::spawn_liveness_monitor;
use crate::persistence::db::{self, Database};
use crate::resources::{HostResources, ResourceManager};
use crate::rpc::methods::register_all;
use crate::rpc::server::{spawn_rpc_server, RpcServer};
use crate::{GlobalConfig, Result};

/// Everything the daemon shares between its services.
pub struct AppContext {
    /// Effective configuration.
    pub config: Arc<GlobalConfig>,
    /// Session store.
    pub db: Arc<Database>,
    /// Session lifecycle owner.
    pub controller: Arc<SessionController>,
    /// Cancels the server and the liveness monitor.
    pub cancel: CancellationToken,
}

impl AppContext {
    /// Open the store at the configured path, wire host resources and
    /// restore sessions from the previous run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be opened or read.
    pub async fn initialize(config: GlobalConfig) -> Result<Self> {
        let db = Arc::new(db::connect(&config.db_path()).await?);
        info!(path = %config.db_path().display(), "database connected");
        let resources: Arc<dyn ResourceManager> = Arc::new(HostResources::new(&config));
        Self::with_parts(Arc::new(config), db, resources).await
    }

    /// Build a context from an existing store and resource manager, then
    /// restore sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn with_parts(
        config: Arc<GlobalConfig>,
        db: Arc<Database>,
        resources: Arc<dyn ResourceManager>,
    ) -> Result<Self> {
        let controller = Arc::new(SessionController::new(
            Arc::clone(&config),
            Arc::clone(&db),
            resources,
        ));
        let restored = controller.restore().await?;
        info!(restored, "sessions restored");

        Ok(Self {
            config,
            db,
            controller,
            cancel: CancellationToken::new(),
        })
    }

    /// Start the RPC server and the liveness monitor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the socket cannot be bound.
    pub fn start_services(&self) -> Result<Vec<JoinHandle<()>>> {
        let api: Arc<dyn SessionApi> = Arc::clone(&self.controller) as Arc<dyn SessionApi>;
        let server = Arc::new(RpcServer::new(register_all()?, api, self.controller.events()));
        let server_handle = spawn_rpc_server(server, &self.config.socket_path, self.cancel.clone())?;

        let liveness_handle = spawn_liveness_monitor(
            Arc::clone(&self.controller),
            self.config.liveness_interval(),
            self.cancel.clone(),
        );

        Ok(vec![server_handle, liveness_handle])
    }

    /// Stop background services and close the store. Agent sessions keep
    /// running and are reconciled on the next start.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        self.cancel.cancel();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "background task ended abnormally");
            }
        }
        self.db.close().await;
        info!("store closed");
    }
}
