//! Method registry and request dispatch.
//!
//! Handlers are registered with typed parameters and results; the registry
//! erases them to `Value -> Value` so the server can route by name.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::message::{Request, Response, RpcError};
use crate::api::SessionApi;
use crate::{AppError, Result};

/// State shared by every handler invocation.
pub struct DispatchContext {
    /// Operation backend.
    pub api: Arc<dyn SessionApi>,
    /// Open connection count, maintained by the server.
    pub connections: Arc<AtomicUsize>,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
type Handler = Box<dyn Fn(Arc<DispatchContext>, Value) -> HandlerFuture + Send + Sync>;

/// Name-to-handler routing table.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: BTreeMap<String, Handler>,
}

impl MethodRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `method`.
    ///
    /// Params are decoded into `P` before the handler runs; a decode
    /// failure is reported as invalid params without calling it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `method` is not of the form
    /// `namespace.name` or is already registered.
    pub fn register<P, R, F, Fut>(&mut self, method: &str, handler: F) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<DispatchContext>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        validate_method_name(method)?;
        if self.handlers.contains_key(method) {
            return Err(AppError::Config(format!(
                "method {method} registered twice"
            )));
        }

        let erased: Handler = Box::new(
            move |ctx: Arc<DispatchContext>, params: Value| -> HandlerFuture {
                match decode_params::<P>(params) {
                    Ok(params) => {
                        let fut = handler(ctx, params);
                        Box::pin(async move {
                            let result = fut.await?;
                            Ok(serde_json::to_value(result)?)
                        })
                    }
                    Err(err) => Box::pin(async move { Err(err) }),
                }
            },
        );
        self.handlers.insert(method.to_owned(), erased);
        Ok(())
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Route `request` to its handler and build the response.
    pub async fn dispatch(&self, ctx: Arc<DispatchContext>, request: Request) -> Response {
        let Request { id, method, params } = request;
        let outcome = match self.handlers.get(&method) {
            Some(handler) => handler(ctx, params).await,
            None => Err(AppError::MethodNotFound(method)),
        };
        Response {
            id,
            outcome: outcome.map_err(|err| RpcError::from(&err)),
        }
    }
}

/// Omitted params decode as an empty object so all-optional param types
/// accept a bare call.
fn decode_params<P: DeserializeOwned>(params: Value) -> Result<P> {
    let params = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|err| AppError::InvalidParams(err.to_string()))
}

fn validate_method_name(method: &str) -> Result<()> {
    let well_formed = method.contains('.')
        && method.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
    if well_formed {
        Ok(())
    } else {
        Err(AppError::Config(format!("malformed method name: {method:?}")))
    }
}
