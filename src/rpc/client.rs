//! Remote [`SessionApi`] over the daemon socket.
//!
//! A single link task owns the socket. Calls are handed to it over a
//! channel with a oneshot for the reply; it assigns request ids, writes the
//! frame, and routes responses back by id. State-change notifications are
//! re-broadcast to [`RemoteSessionApi::subscribe`] receivers.
//!
//! When the link task exits every outstanding reply sender is dropped, so
//! pending calls fail with `TransportClosed` instead of waiting for their
//! timeout. The next call reconnects.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::Stream;
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::codec::RpcCodec;
use super::message::{Message, Request, RequestId};
use super::methods::{
    NoParams, OutputParams, RunParams, SendParams, SendResult, SessionIdParams, ARCHIVE,
    CHECK_LIVENESS, GET, GET_DIFF, GET_OUTPUT, LIST, PAUSE, PING, RESUME, RUN_IN_WORKTREE,
    SEND_TO, START_CODING, STATUS, STOP,
};
use crate::api::{
    ApiFuture, LivenessReport, ServerStatus, SessionApi, SessionFilter, StartCodingRequest,
};
use crate::models::event::{StateChanged, STATE_CHANGED_METHOD};
use crate::models::session::Session;
use crate::{AppError, Result};

const COMMAND_CAPACITY: usize = 64;
const NOTIFICATION_CAPACITY: usize = 256;
const MAX_BACKOFF: Duration = Duration::from_secs(2);

type ReplyTx = oneshot::Sender<Result<Value>>;

/// Connection behaviour of a [`RemoteSessionApi`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound on one call, connect time excluded.
    pub call_timeout: Duration,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Delay before the second attempt; doubles per attempt.
    pub initial_backoff: Duration,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            connect_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

struct Command {
    method: String,
    params: Value,
    reply: ReplyTx,
}

/// Client-side proxy implementing [`SessionApi`] over JSON-RPC.
pub struct RemoteSessionApi {
    socket_path: PathBuf,
    options: ClientOptions,
    link: Mutex<Option<mpsc::Sender<Command>>>,
    notifications: broadcast::Sender<StateChanged>,
}

impl RemoteSessionApi {
    /// Create a proxy that connects lazily on the first call.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>, options: ClientOptions) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            socket_path: socket_path.into(),
            options,
            link: Mutex::new(None),
            notifications,
        }
    }

    /// Create a proxy and connect immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportClosed` if the daemon cannot be reached
    /// within the configured attempts.
    pub async fn connect(socket_path: impl Into<PathBuf>, options: ClientOptions) -> Result<Self> {
        let api = Self::new(socket_path, options);
        api.link().await?;
        Ok(api)
    }

    /// Receive `session.state_changed` notifications delivered on the
    /// current connection.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.notifications.subscribe()
    }

    /// Whether a live connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.link
            .lock()
            .await
            .as_ref()
            .is_some_and(|link| !link.is_closed())
    }

    /// Drop the connection. The next call reconnects.
    pub async fn disconnect(&self) {
        self.link.lock().await.take();
    }

    /// Issue a raw call and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns the remote error, `AppError::TransportClosed` if the
    /// connection is lost, or `AppError::Timeout` if no reply arrives in
    /// time.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let link = self.link().await?;
        let (reply, rx) = oneshot::channel();
        link.send(Command {
            method: method.to_owned(),
            params,
            reply,
        })
        .await
        .map_err(|_| closed())?;

        match tokio::time::timeout(self.options.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(closed()),
            Err(_) => Err(AppError::Timeout(format!(
                "{method} got no reply within {}s",
                self.options.call_timeout.as_secs()
            ))),
        }
    }

    async fn call_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R> {
        let value = self.call(method, serde_json::to_value(params)?).await?;
        serde_json::from_value(value)
            .map_err(|err| AppError::Internal(format!("unexpected {method} result: {err}")))
    }

    async fn link(&self) -> Result<mpsc::Sender<Command>> {
        let mut guard = self.link.lock().await;
        if let Some(link) = guard.as_ref() {
            if !link.is_closed() {
                return Ok(link.clone());
            }
            debug!("daemon connection lost, reconnecting");
        }
        let link = self.open_link().await?;
        *guard = Some(link.clone());
        Ok(link)
    }

    async fn open_link(&self) -> Result<mpsc::Sender<Command>> {
        let mut delay = self.options.initial_backoff;
        let mut last_error = String::from("no connection attempts configured");

        for attempt in 1..=self.options.connect_attempts {
            match tokio::time::timeout(
                self.options.connect_timeout,
                connect_stream(&self.socket_path),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
                    tokio::spawn(link_loop(stream, rx, self.notifications.clone()));
                    return Ok(tx);
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = "connect timed out".to_owned(),
            }
            if attempt < self.options.connect_attempts {
                debug!(attempt, error = %last_error, "daemon connect failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }

        Err(AppError::TransportClosed(format!(
            "cannot reach daemon at {}: {last_error}",
            self.socket_path.display()
        )))
    }
}

async fn connect_stream(path: &Path) -> std::io::Result<Stream> {
    let name = path.to_fs_name::<GenericFilePath>()?;
    Stream::connect(name).await
}

fn closed() -> AppError {
    AppError::TransportClosed("connection to daemon lost".into())
}

/// Own the socket: write queued calls, route replies and notifications.
async fn link_loop(
    stream: Stream,
    mut commands: mpsc::Receiver<Command>,
    notifications: broadcast::Sender<StateChanged>,
) {
    let (reader, writer) = stream.split();
    let mut frames = FramedRead::new(reader, RpcCodec::new());
    let mut sink = FramedWrite::new(writer, RpcCodec::new());
    let mut pending: HashMap<i64, ReplyTx> = HashMap::new();
    let mut next_id: i64 = 1;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                let id = next_id;
                next_id += 1;
                // Replies whose caller timed out are never claimed.
                pending.retain(|_, reply| !reply.is_closed());
                pending.insert(id, command.reply);
                let request = Message::Request(Request {
                    id: RequestId::Number(id),
                    method: command.method,
                    params: command.params,
                });
                if let Err(err) = sink.send(request).await {
                    warn!(%err, "failed to write to daemon");
                    break;
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(Message::Response(response))) => {
                    let RequestId::Number(id) = response.id else {
                        debug!(id = %response.id, "reply with foreign id");
                        continue;
                    };
                    if let Some(reply) = pending.remove(&id) {
                        let _ = reply.send(response.outcome.map_err(AppError::from));
                    }
                }
                Some(Ok(Message::Notification(note))) => {
                    if note.method != STATE_CHANGED_METHOD {
                        debug!(method = %note.method, "ignoring notification");
                        continue;
                    }
                    match serde_json::from_value::<StateChanged>(note.params) {
                        Ok(change) => {
                            let _ = notifications.send(change);
                        }
                        Err(err) => warn!(%err, "malformed state notification"),
                    }
                }
                Some(Ok(Message::Request(request))) => {
                    debug!(method = %request.method, "ignoring request from daemon");
                }
                Some(Err(err)) => {
                    warn!(%err, "malformed frame from daemon");
                    break;
                }
                None => break,
            },
        }
    }
    debug!(pending = pending.len(), "daemon link closed");
}

impl SessionApi for RemoteSessionApi {
    fn start_coding(&self, request: StartCodingRequest) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.call_typed(START_CODING, &request).await })
    }

    fn stop(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.call_typed(STOP, &SessionIdParams { session_id }).await })
    }

    fn pause(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.call_typed(PAUSE, &SessionIdParams { session_id }).await })
    }

    fn resume(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.call_typed(RESUME, &SessionIdParams { session_id }).await })
    }

    fn archive(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.call_typed(ARCHIVE, &SessionIdParams { session_id }).await })
    }

    fn get(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.call_typed(GET, &SessionIdParams { session_id }).await })
    }

    fn list(&self, filter: SessionFilter) -> ApiFuture<'_, Vec<Session>> {
        Box::pin(async move { self.call_typed(LIST, &filter).await })
    }

    fn check_liveness(&self, session_id: String) -> ApiFuture<'_, LivenessReport> {
        Box::pin(async move {
            self.call_typed(CHECK_LIVENESS, &SessionIdParams { session_id })
                .await
        })
    }

    fn get_output(&self, session_id: String, lines: u32) -> ApiFuture<'_, String> {
        Box::pin(async move {
            self.call_typed(GET_OUTPUT, &OutputParams { session_id, lines })
                .await
        })
    }

    fn send_to(&self, session_id: String, text: String) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let _: SendResult = self
                .call_typed(SEND_TO, &SendParams { session_id, text })
                .await?;
            Ok(())
        })
    }

    fn get_diff(&self, session_id: String) -> ApiFuture<'_, String> {
        Box::pin(async move { self.call_typed(GET_DIFF, &SessionIdParams { session_id }).await })
    }

    fn run_in_worktree(&self, session_id: String, command: String) -> ApiFuture<'_, String> {
        Box::pin(async move {
            self.call_typed(RUN_IN_WORKTREE, &RunParams { session_id, command })
                .await
        })
    }

    fn ping(&self) -> ApiFuture<'_, String> {
        Box::pin(async move { self.call_typed(PING, &NoParams {}).await })
    }

    fn status(&self) -> ApiFuture<'_, ServerStatus> {
        Box::pin(async move { self.call_typed(STATUS, &NoParams {}).await })
    }
}
