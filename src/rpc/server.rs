//! Unix-socket JSON-RPC server for `agentbench-ctl` and other clients.
//!
//! Each connection gets a reader loop, a writer task fed by a bounded
//! queue, and a subscription to session state changes. Requests are
//! dispatched on their own tasks so a slow `start_coding` does not block
//! a `list` on the same connection; responses may therefore arrive out of
//! order and are matched by id.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::Stream;
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::RpcCodec;
use super::dispatcher::{DispatchContext, MethodRegistry};
use super::message::{Message, Notification, Request, RequestId, Response, RpcError};
use crate::api::SessionApi;
use crate::models::event::{SessionEvent, STATE_CHANGED_METHOD};
use crate::orchestrator::REQUEST_ORIGIN;
use crate::{AppError, Result};

/// Per-connection outbound queue depth. Notifications are dropped for a
/// connection whose queue is full; responses wait for space.
const OUTBOUND_CAPACITY: usize = 128;

/// Routing state shared by every connection.
pub struct RpcServer {
    registry: MethodRegistry,
    context: Arc<DispatchContext>,
    events: broadcast::Sender<SessionEvent>,
    next_connection: AtomicU64,
}

impl RpcServer {
    /// Create a server over `api`, forwarding `events` to clients.
    #[must_use]
    pub fn new(
        registry: MethodRegistry,
        api: Arc<dyn SessionApi>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            registry,
            context: Arc::new(DispatchContext {
                api,
                connections: Arc::new(AtomicUsize::new(0)),
            }),
            events,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Currently open connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.context.connections.load(Ordering::Relaxed)
    }
}

/// Bind `socket_path` and spawn the accept loop.
///
/// A leftover socket file with no listener behind it is removed first; a
/// live one means another daemon owns the path.
///
/// # Errors
///
/// Returns `AppError::Transport` if another daemon is listening or the
/// listener cannot be created.
pub fn spawn_rpc_server(
    server: Arc<RpcServer>,
    socket_path: &Path,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    reclaim_stale_socket(socket_path)?;
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener_name = socket_path
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| {
            AppError::Transport(format!(
                "invalid socket path '{}': {err}",
                socket_path.display()
            ))
        })?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Transport(format!("failed to create rpc listener: {err}")))?;

    restrict_permissions(socket_path)?;
    info!(socket = %socket_path.display(), "rpc server listening");

    let path = socket_path.to_path_buf();
    let handle = tokio::spawn(async move {
        let span = info_span!("rpc_server", socket = %path.display());
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("rpc server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let conn_id = server.next_connection.fetch_add(1, Ordering::Relaxed);
                                tokio::spawn(handle_connection(
                                    stream,
                                    Arc::clone(&server),
                                    conn_id,
                                    ct.clone(),
                                ));
                            }
                            Err(err) => {
                                warn!(%err, "rpc accept failed");
                            }
                        }
                    }
                }
            }
            drop(listener);
            remove_socket(&path);
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single client connection until EOF, a malformed frame, or
/// shutdown.
async fn handle_connection(
    stream: Stream,
    server: Arc<RpcServer>,
    conn_id: u64,
    ct: CancellationToken,
) {
    let span = info_span!("rpc_conn", conn = conn_id);
    async move {
        let connections = Arc::clone(&server.context.connections);
        connections.fetch_add(1, Ordering::Relaxed);
        debug!("rpc connection opened");

        let (reader, writer) = stream.split();
        let mut frames = FramedRead::new(reader, RpcCodec::new());
        let mut sink = FramedWrite::new(writer, RpcCodec::new());

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let closing = ct.child_token();
        let writer_closing = closing.clone();
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        () = writer_closing.cancelled() => break,
                        message = out_rx.recv() => {
                            let Some(message) = message else { break };
                            if let Err(err) = sink.send(message).await {
                                debug!(%err, "rpc write failed");
                                break;
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        let mut events = server.events.subscribe();
        let mut events_open = true;
        let mut peer_closed = false;
        let in_flight: Arc<Mutex<HashSet<RequestId>>> =
            Arc::new(Mutex::new(HashSet::new()));

        loop {
            tokio::select! {
                () = ct.cancelled() => break,
                event = events.recv(), if events_open => match event {
                    Ok(event) => forward_event(&event, conn_id, &out_tx),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "rpc connection missed state notifications");
                    }
                    Err(RecvError::Closed) => events_open = false,
                },
                frame = frames.next() => match frame {
                    Some(Ok(Message::Request(request))) => {
                        if !in_flight.lock().await.insert(request.id.clone()) {
                            let response = Response {
                                id: request.id.clone(),
                                outcome: Err(RpcError::from(&AppError::InvalidRequest(format!(
                                    "request id {} is already in flight",
                                    request.id
                                )))),
                            };
                            if out_tx.send(Message::Response(response)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        spawn_request(request, &server, conn_id, &in_flight, &out_tx);
                    }
                    Some(Ok(Message::Notification(note))) => {
                        debug!(method = %note.method, "ignoring client notification");
                    }
                    Some(Ok(Message::Response(response))) => {
                        debug!(id = %response.id, "ignoring client response");
                    }
                    Some(Err(err)) => {
                        warn!(%err, "closing rpc connection after malformed frame");
                        break;
                    }
                    None => {
                        peer_closed = true;
                        break;
                    }
                },
            }
        }

        // After a clean EOF the writer drains replies still in flight; any
        // other exit discards them along with the socket.
        if !peer_closed {
            closing.cancel();
        }
        connections.fetch_sub(1, Ordering::Relaxed);
        debug!("rpc connection closed");
    }
    .instrument(span)
    .await;
}

fn spawn_request(
    request: Request,
    server: &Arc<RpcServer>,
    conn_id: u64,
    in_flight: &Arc<Mutex<HashSet<RequestId>>>,
    out_tx: &mpsc::Sender<Message>,
) {
    let server = Arc::clone(server);
    let in_flight = Arc::clone(in_flight);
    let out_tx = out_tx.clone();
    let span = info_span!("rpc_request", method = %request.method, id = %request.id);

    tokio::spawn(
        REQUEST_ORIGIN.scope(
            conn_id,
            async move {
                let id = request.id.clone();
                let response = server
                    .registry
                    .dispatch(Arc::clone(&server.context), request)
                    .await;
                if let Err(err) = &response.outcome {
                    debug!(code = err.code, message = %err.message, "request failed");
                }
                in_flight.lock().await.remove(&id);
                if out_tx.send(Message::Response(response)).await.is_err() {
                    debug!("connection closed before response was written");
                }
            }
            .instrument(span),
        ),
    );
}

/// Queue a state-change notification unless `conn_id` caused it.
fn forward_event(event: &SessionEvent, conn_id: u64, out_tx: &mpsc::Sender<Message>) {
    if event.origin == Some(conn_id) {
        return;
    }
    let params = match serde_json::to_value(&event.change) {
        Ok(params) => params,
        Err(err) => {
            warn!(%err, "failed to encode state notification");
            return;
        }
    };
    let note = Message::Notification(Notification {
        method: STATE_CHANGED_METHOD.to_owned(),
        params,
    });
    if out_tx.try_send(note).is_err() {
        debug!(session_id = %event.change.session_id, "dropping notification for slow client");
    }
}

fn reclaim_stale_socket(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(AppError::Transport(format!(
            "another daemon is already listening on {}",
            path.display()
        )));
    }
    info!(socket = %path.display(), "removing stale socket");
    std::fs::remove_file(path)?;
    Ok(())
}

fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(%err, "failed to remove socket file"),
    }
}
