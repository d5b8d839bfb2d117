//! `ParleyServer`: wiring of the fan-out components behind an Axum HTTP +
//! WebSocket gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::FutureExt;
use metrics_exporter_prometheus::PrometheusHandle;
use parley_core::messages::ChatMessage;
use parley_core::{ProcessId, RoomId, UserId};
use parley_store::ChatStore;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::blocking::with_store;
use crate::bus::{BroadcastBus, BusTransport};
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthCounters, HealthResponse};
use crate::sequence::SequenceGenerator;
use crate::service::ChatService;
use crate::shared::SharedState;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;
use crate::websocket::{LocalFanout, RoomSubscriptionTracker, SessionRegistry};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Room and message operations.
    pub service: Arc<ChatService>,
    /// Local connections.
    pub registry: Arc<SessionRegistry>,
    /// This process's end of the bus.
    pub bus: Arc<BroadcastBus>,
    /// Persistent store, used to authenticate the handshake.
    pub store: Arc<dyn ChatStore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// This process's identity.
    pub process_id: ProcessId,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// A running server: bound address plus its background tasks.
pub struct ServerHandle {
    /// Address the listener is bound to.
    pub addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Background tasks (HTTP server, bus receiver, dedup sweep), for
    /// [`ShutdownCoordinator::graceful_shutdown`].
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

/// The Parley server for one process.
pub struct ParleyServer {
    state: AppState,
}

impl ParleyServer {
    /// Wire every component for `process_id`.
    ///
    /// `shared` holds the sequence counters and subscription sets; `transport`
    /// carries envelopes between processes.
    pub fn new(
        config: ServerConfig,
        process_id: ProcessId,
        store: Arc<dyn ChatStore>,
        shared: Arc<dyn SharedState>,
        transport: Arc<dyn BusTransport>,
        metrics: PrometheusHandle,
    ) -> Self {
        let bus = Arc::new(BroadcastBus::new(process_id.clone(), transport, &config.dedup));
        let tracker = Arc::new(RoomSubscriptionTracker::new(
            process_id.clone(),
            Arc::clone(&shared),
            bus.clone(),
        ));
        let registry = Arc::new(SessionRegistry::new(tracker));
        let fanout = Arc::new(LocalFanout::new(Arc::clone(&store), registry.clone()));

        let delivery_fanout = Arc::clone(&fanout);
        let _ = bus.set_delivery(Arc::new(move |room: RoomId, message: ChatMessage| {
            let fanout = Arc::clone(&delivery_fanout);
            async move {
                let _ = fanout.send_message_to_local_room(room, &message, None).await;
            }
            .boxed()
        }));

        let service = ChatService::new(
            Arc::clone(&store),
            SequenceGenerator::new(shared),
            bus.clone(),
            registry.clone(),
            fanout,
        )
        .with_limits(config.history, config.default_max_members);

        Self {
            state: AppState {
                service: Arc::new(service),
                registry,
                bus,
                store,
                config: Arc::new(config),
                process_id,
                metrics,
                start_time: Instant::now(),
                shutdown: Arc::new(ShutdownCoordinator::new()),
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start background tasks, bind the listener and serve until shutdown.
    ///
    /// Clears any subscription set left in shared state by an earlier run
    /// with the same process ID before accepting connections.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let token = self.state.shutdown.token();

        if let Err(err) = self.state.registry.tracker().teardown().await {
            warn!(error = %err, "failed to clear stale room subscriptions");
        }

        let receiver = self.state.bus.start_receiver(token.clone()).await?;
        let sweeper = self
            .state
            .bus
            .dedup()
            .spawn_sweeper(self.state.config.dedup.sweep_interval, token.clone());

        let bind = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;
        info!(%addr, process_id = %self.state.process_id, "parley server listening");

        let router = self.router();
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                error!(error = %err, "http server failed");
            }
        });

        Ok(ServerHandle {
            addr,
            tasks: vec![server, receiver, sweeper],
        })
    }

    /// Release every room subscription this process holds.
    pub async fn teardown(&self) {
        if let Err(err) = self.state.registry.tracker().teardown().await {
            error!(error = %err, "room subscription teardown failed");
        }
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Get the broadcast bus.
    pub fn bus(&self) -> &Arc<BroadcastBus> {
        &self.state.bus
    }

    /// Get the chat service.
    pub fn service(&self) -> &Arc<ChatService> {
        &self.state.service
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// This process's identity.
    pub fn process_id(&self) -> &ProcessId {
        &self.state.process_id
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let counters = HealthCounters {
        connections: state.registry.connection_count(),
        users: state.registry.user_count(),
        subscribed_rooms: state.bus.subscribed_count(),
        dedup_entries: state.bus.dedup().len(),
    };
    Json(health::health_check(
        state.start_time,
        state.process_id.clone(),
        counters,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// GET /ws?userId=<id>
///
/// The identity must name an existing user; otherwise the upgrade is
/// refused with 401 before the socket is accepted.
async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(user_id) = params
        .user_id
        .as_deref()
        .and_then(|raw| raw.parse::<UserId>().ok())
        .filter(|id| id.get() > 0)
    else {
        debug!("websocket handshake without a valid userId");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match with_store(&state.store, move |store| Ok(store.find_user(user_id)?)).await {
        Ok(Some(user)) if user.is_active => {}
        Ok(_) => {
            debug!(%user_id, "websocket handshake for unknown user");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(err) => {
            error!(%user_id, error = %err, "user lookup failed during handshake");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let max_size = state.config.max_message_size;
    ws.max_message_size(max_size)
        .on_upgrade(move |socket| run_ws_session(socket, user_id, state))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::bus::MemoryBusHub;
    use crate::metrics::detached_handle;
    use crate::shared::MemorySharedState;
    use crate::test_support::{store, user};

    fn make_server(store: Arc<dyn ChatStore>) -> ParleyServer {
        ParleyServer::new(
            ServerConfig::default(),
            ProcessId::from("node-test"),
            store,
            Arc::new(MemorySharedState::new()),
            Arc::new(MemoryBusHub::default().transport()),
            detached_handle(),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_endpoint_reports_counters() {
        let server = make_server(store());
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["processId"], "node-test");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["subscribedRooms"], 0);
        assert!(body["dedupEntries"].is_number());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let server = make_server(store());
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_identity_is_unauthorized() {
        let server = make_server(store());
        let (status, _) = get_json(server.router(), "/ws").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_with_unknown_or_malformed_identity_is_unauthorized() {
        let store = store();
        let _ = user(&*store, "a");
        let server = make_server(store);
        for uri in ["/ws?userId=abc", "/ws?userId=-3", "/ws?userId=4242"] {
            let (status, _) = get_json(server.router(), uri).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(store());
        let (status, _) = get_json(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shutdown_propagates_to_coordinator() {
        let server = make_server(store());
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn listen_binds_and_stops_on_shutdown() {
        let server = make_server(store());
        let handle = server.listen().await.unwrap();
        assert_ne!(handle.addr.port(), 0);
        server
            .shutdown()
            .graceful_shutdown(handle.into_tasks(), Some(std::time::Duration::from_secs(5)))
            .await;
    }
}
