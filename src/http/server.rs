//! Per-worker connection server.
//!
//! # Responsibilities
//! - Bind the public listener (and the internal one when configured)
//! - Accept forever, one task per connection
//! - Decode one request, dispatch it, write one response, close
//! - Contain handler panics at the connection boundary
//!
//! # Design Decisions
//! - `serve_forever` only returns on a listener-level failure; the worker
//!   entry point owns recovery from that
//! - Each request loads the route snapshot once and keeps it to the end
//! - Handlers run synchronously on the worker's event loop

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::auth::{extract_bearer, ClaimsContext, CredentialValidator};
use crate::config::ServerConfig;
use crate::http::request::{read_request, DecodeError, Request};
use crate::http::response::Response;
use crate::net::listener::resolve;
use crate::net::{ConnectionTracker, Listener, ListenerError, ListenerKind};
use crate::routing::{HandlerRegistry, Resolution, RouteSnapshot};
use crate::security::IpAllowList;

/// Failure of the listening side. Per-connection failures never surface here.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("listener failure: {0}")]
    Listener(#[from] ListenerError),

    #[error("connection server stopped unexpectedly")]
    Stopped,
}

/// Accepts connections for one worker and dispatches their requests.
#[derive(Clone)]
pub struct ConnectionServer {
    config: Arc<ServerConfig>,
    routes: Arc<RouteSnapshot>,
    registry: Arc<HandlerRegistry>,
    validator: Arc<dyn CredentialValidator>,
    allow_list: Arc<IpAllowList>,
    tracker: ConnectionTracker,
}

impl ConnectionServer {
    pub fn new(
        config: ServerConfig,
        routes: Arc<RouteSnapshot>,
        registry: Arc<HandlerRegistry>,
        validator: Arc<dyn CredentialValidator>,
    ) -> Self {
        let allow_list = IpAllowList::from_config(&config.access);
        Self {
            config: Arc::new(config),
            routes,
            registry,
            validator,
            allow_list: Arc::new(allow_list),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Replace the internal listener's allow-list.
    pub fn with_allow_list(mut self, allow_list: IpAllowList) -> Self {
        self.allow_list = Arc::new(allow_list);
        self
    }

    /// Tag connection ids with the worker's pool slot. Resets the counters.
    pub fn with_slot(mut self, slot: usize) -> Self {
        self.tracker = ConnectionTracker::for_slot(slot);
        self
    }

    /// Number of connections currently being handled.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Bind the configured listeners and serve until one of them fails.
    pub async fn serve_forever(&self) -> Result<(), ServeError> {
        let listener = &self.config.listener;
        let public = Listener::bind(
            resolve(&listener.host, listener.port)?,
            listener.backlog,
            ListenerKind::Public,
        )?;
        let internal = match self.config.access.internal_port {
            Some(port) => Some(Listener::bind(
                resolve(&listener.host, port)?,
                listener.backlog,
                ListenerKind::Internal,
            )?),
            None => None,
        };
        self.serve(public, internal).await
    }

    /// Serve on already-bound listeners.
    pub async fn serve(&self, public: Listener, internal: Option<Listener>) -> Result<(), ServeError> {
        match internal {
            Some(internal) => {
                tokio::try_join!(self.accept_loop(public), self.accept_loop(internal))?;
            }
            None => self.accept_loop(public).await?,
        }
        Err(ServeError::Stopped)
    }

    async fn accept_loop(&self, listener: Listener) -> Result<(), ServeError> {
        let kind = listener.kind();
        loop {
            let Some((stream, peer)) = listener.accept().await? else {
                continue;
            };
            let guard = self.tracker.track();
            let server = self.clone();
            tokio::spawn(async move {
                tracing::debug!(connection_id = %guard.id(), peer = %peer, kind = %kind, "Connection accepted");
                server.handle_connection(stream, peer, kind).await;
                drop(guard);
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr, kind: ListenerKind) {
        let Some(response) = self.respond(&mut stream, peer, kind).await else {
            return;
        };
        if let Err(e) = stream.write_all(&response.encode()).await {
            tracing::debug!(peer = %peer, error = %e, "Failed to write response");
        }
        let _ = stream.shutdown().await;
    }

    async fn respond(&self, stream: &mut TcpStream, peer: SocketAddr, kind: ListenerKind) -> Option<Response> {
        if kind == ListenerKind::Internal && !self.allow_list.is_allowed(peer.ip()) {
            tracing::warn!(peer = %peer, "Peer not allowed on internal listener");
            return Some(Response::error(403, "IP not allowed"));
        }

        match read_request(stream, self.config.server.max_request_bytes).await {
            Ok(Some(request)) => Some(self.dispatch(&request)),
            Ok(None) => None,
            Err(DecodeError::Io(e)) => {
                tracing::debug!(peer = %peer, error = %e, "Read failed");
                None
            }
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Bad request");
                Some(Response::error(400, e.to_string()))
            }
        }
    }

    /// Route, authenticate and run one decoded request.
    pub fn dispatch(&self, request: &Request) -> Response {
        let response = self.dispatch_inner(request);
        tracing::info!(
            method = %request.method,
            path = %request.path,
            code = response.code,
            request_id = %response.request_id,
            "Request served"
        );
        response
    }

    fn dispatch_inner(&self, request: &Request) -> Response {
        let payload = match request.payload() {
            Ok(payload) => payload,
            Err(e) => return Response::error(400, e.to_string()),
        };

        let snapshot = self.routes.load();
        let entry = match snapshot.table.resolve(&request.path, &request.method) {
            Resolution::Found(entry) => entry,
            Resolution::MethodNotAllowed => return Response::error(405, "Method Not Allowed"),
            Resolution::NotFound => return Response::error(404, "Not Found"),
        };

        let ctx = if entry.credential_required {
            let claims = match extract_bearer(request.header("Authorization"))
                .and_then(|token| self.validator.validate(token))
            {
                Ok(claims) => claims,
                Err(e) => {
                    tracing::debug!(path = %request.path, error = %e, "Credential rejected");
                    return Response::error(401, "Token expired or invalid");
                }
            };
            if entry.role_required && claims.role.is_none() {
                return Response::error(403, "Role required");
            }
            ClaimsContext::from_claims(claims)
        } else {
            ClaimsContext::empty()
        };

        let Some(handler) = self.registry.get(&entry.handler_id) else {
            tracing::error!(handler = %entry.handler_id, "Route points at an unregistered handler");
            return Response::error(500, "Internal Server Error");
        };

        match catch_unwind(AssertUnwindSafe(|| handler(&ctx, &payload))) {
            Ok(response) => Response::from(response),
            Err(_) => {
                tracing::error!(handler = %entry.handler_id, version = snapshot.version, "Handler panicked");
                Response::error(500, "Internal Server Error")
            }
        }
    }
}
