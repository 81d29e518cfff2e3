//! Daemon wiring and lifecycle.
//!
//! Constructs the process-wide singletons (activity channel, proxy pool,
//! token cache) once, passes them explicitly into the decision engine, and
//! serves the RPC front end until a shutdown signal drains it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::activity::ActivityChannel;
use crate::config::Config;
use crate::policy::PolicyEngine;
use crate::proxy::ProxyPool;
use crate::proxy::pool::ProxyPoolConfig;
use crate::rpc::exec_chain::ExecChainTracker;
use crate::rpc::token_cache::TokenCache;
use crate::rpc::{AppState, create_router};
use crate::store::{ConfigPolicyStore, GraphStore, MemoryStore, PolicyStore, ProfileStore, SecretStore};
use crate::{Error, Result};

/// The AgenShield daemon.
pub struct Daemon {
    config: Config,
    state: Arc<AppState>,
}

impl Daemon {
    /// Wire up a daemon from configuration. With no external storage bound,
    /// policies come from the configuration and the graph, secret, and
    /// profile seams are served by an in-memory store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let policy_store: Arc<dyn PolicyStore> =
            Arc::new(ConfigPolicyStore::new(config.policies.clone()));
        Self::with_stores(
            config,
            policy_store,
            Arc::clone(&store) as Arc<dyn GraphStore>,
            Arc::clone(&store) as Arc<dyn SecretStore>,
            store as Arc<dyn ProfileStore>,
        )
    }

    /// Wire up a daemon over explicit storage seams.
    #[must_use]
    pub fn with_stores(
        config: Config,
        policies: Arc<dyn PolicyStore>,
        graph: Arc<dyn GraphStore>,
        secrets: Arc<dyn SecretStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let activity = Arc::new(ActivityChannel::new(config.activity.buffer_size));
        let pool = Arc::new(ProxyPool::new(
            ProxyPoolConfig {
                max_concurrent: config.proxy_pool.max_concurrent,
                idle_timeout: config.proxy_pool.idle_timeout,
            },
            Arc::clone(&activity),
        ));
        let engine = Arc::new(PolicyEngine::new(
            policies,
            graph,
            secrets,
            Arc::clone(&pool),
            config.default_action.into(),
            config.sandbox.clone(),
            config.broker.http_port,
        ));
        let state = Arc::new(AppState {
            engine,
            activity,
            token_cache: Arc::new(TokenCache::new(profiles)),
            exec_chain: Arc::new(ExecChainTracker::new()),
            pool,
            http: reqwest::Client::new(),
        });
        Self { config, state }
    }

    /// Shared application state (tests drive the router through this).
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Build the HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state())
    }

    /// Serve until SIGINT/SIGTERM, then drain in-flight RPCs and shut the
    /// proxy pool down.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        info!(
            %addr,
            policies = self.config.policies.len(),
            default_action = ?self.config.default_action,
            "AgenShield daemon listening"
        );

        let pool = Arc::clone(&self.state.pool);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        pool.shutdown();
        info!("daemon shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
