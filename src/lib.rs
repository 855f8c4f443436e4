// SPDX-License-Identifier: MIT OR Apache-2.0

//! A translating Ethereum JSON-RPC gateway for the Hedera network.
//!
//! Clients speak standard Ethereum wire semantics; reads are synthesised
//! from Mirror Node REST queries and writes go through the consensus node
//! SDK, which the embedding application supplies via the [SdkClient] seam.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::routing::{get, post};
use jsonrpc_v2::Data;
use tower_http::cors::CorsLayer;

pub mod apis;
pub mod auth;
pub mod cache;
pub mod consensus;
pub mod conv;
pub mod error;
pub mod filters;
pub mod handlers;
pub mod limiter;
pub mod mirror;
pub mod precheck;
pub mod settings;
pub mod state;
pub mod subs;

pub use consensus::SdkClient;
pub use error::JsonRpcError;
pub use mirror::MirrorClient;
pub use settings::Settings;
pub use state::JsonRpcState;

use settings::ServerKind;

/// This is passed to every method handler. It's generic in the SDK client
/// type to facilitate testing with mocks.
pub type JsonRpcData<S> = Data<JsonRpcState<S>>;
pub type JsonRpcServer = Arc<jsonrpc_v2::Server<jsonrpc_v2::MapRouter>>;
pub type JsonRpcResult<T> = Result<T, JsonRpcError>;

/// How long request and response headers may take on the wire.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// This is the state we will pass to [axum] so that we can extract it in handlers.
pub struct AppState<S> {
    pub rpc_server: JsonRpcServer,
    pub rpc_state: Arc<JsonRpcState<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            rpc_server: self.rpc_server.clone(),
            rpc_state: self.rpc_state.clone(),
        }
    }
}

/// Start listening to JSON-RPC requests until interrupted.
pub async fn listen<A: ToSocketAddrs, S: SdkClient>(
    listen_addr: A,
    settings: Settings,
    sdk: S,
) -> anyhow::Result<()> {
    let listen_addr = listen_addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow!("failed to convert to any socket address"))?;

    let app_state = make_app_state(settings, sdk)?;
    let router = make_router(app_state);

    let server = axum::Server::try_bind(&listen_addr)?
        .http1_header_read_timeout(HTTP_TIMEOUT)
        .serve(router.into_make_service());

    tracing::info!(?listen_addr, "bound Ethereum JSON-RPC relay");

    server
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down, draining in-flight requests");
        })
        .await?;
    Ok(())
}

/// Wire up the shared state and start the background cache sweeper.
pub fn make_app_state<S: SdkClient>(settings: Settings, sdk: S) -> anyhow::Result<AppState<S>> {
    let mirror = MirrorClient::new(&settings.mirror_node)?;
    let rpc_state = Arc::new(JsonRpcState::new(settings, mirror, sdk));

    cache::start_cache_sweeper(
        rpc_state.caches.clone(),
        rpc_state.settings.cache.cleanup_interval,
    );

    let rpc_server = make_server(rpc_state.clone());
    Ok(AppState {
        rpc_server,
        rpc_state,
    })
}

/// Register method handlers with the JSON-RPC server construct.
fn make_server<S: SdkClient>(state: Arc<JsonRpcState<S>>) -> JsonRpcServer {
    let server = jsonrpc_v2::Server::new().with_data(Data(state.clone()));
    let server = apis::register_methods::<S>(server, &state.settings);
    server.finish()
}

/// Register routes in the `axum` HTTP router to handle JSON-RPC calls,
/// with the WebSocket upgrade only mounted in WS mode.
pub fn make_router<S: SdkClient>(app_state: AppState<S>) -> axum::Router {
    let router = axum::Router::new().route("/", post(handlers::http::handle::<S>));
    let router = if app_state.rpc_state.settings.server.kind == ServerKind::Ws {
        router.route("/", get(handlers::ws::handle::<S>))
    } else {
        router
    };
    router.layer(CorsLayer::permissive()).with_state(app_state)
}
