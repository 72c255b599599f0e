//! Node Composition Root
//!
//! Wires the SQLite and filesystem adapters into the core services, runs the
//! startup sequence and serves the HTTP router until stopped.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use apihub_api_http::{router, AppState, LogLevelControl, RateLimiter, ReadyGate};
use apihub_core::application::{
    shutdown_channel, BuildDispatcher, BuilderCoordinator, CatalogService, ComparisonService,
    InternalExecutor, LocalBuildProcessor, MaintenanceScheduler, RecoveryService,
    ResultFinalizer, SessionManager, ShutdownSender, Stores, WsLoadBalancer,
};
use apihub_core::port::id_provider::UuidProvider;
use apihub_core::port::time_provider::SystemTimeProvider;
use apihub_core::port::{ConfigRoleService, IdProvider, TimeProvider};
use apihub_infra_blob::FsArtifactStore;
use apihub_infra_sqlite::{
    create_pool, run_migrations, SqliteJobRepository, SqliteMaintenance, SqliteVersionStore,
    SqliteWsDirectory,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running API Hub node
pub struct Node {
    state: AppState,
    local_addr: SocketAddr,
    shutdown: ShutdownSender,
    server_cancel: CancellationToken,
    server: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl Node {
    /// Run the startup sequence and begin serving on `listener`.
    ///
    /// The readiness gate fires once migrations, recovery, workers and the
    /// WS directory registration have all completed.
    pub async fn start(
        config: &AppConfig,
        listener: TcpListener,
        log_level: Option<Arc<dyn LogLevelControl>>,
    ) -> Result<Self> {
        config.validate()?;
        let local_addr = listener.local_addr()?;
        let node_addr = config
            .server
            .node_addr
            .clone()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| local_addr.to_string());
        let ready = ReadyGate::new();

        // 1. Database
        let db_url = config.database_url();
        info!(database = %db_url, "Initializing database...");
        let pool = create_pool(&db_url, config.database.max_connections)
            .await
            .context("DB pool creation failed")?;
        run_migrations(&pool).await.context("Migration failed")?;

        // 2. Adapters
        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let ids: Arc<dyn IdProvider> = Arc::new(UuidProvider);
        let versions = Arc::new(SqliteVersionStore::new(pool.clone(), time.clone()));
        let artifacts = Arc::new(
            FsArtifactStore::open(config.artifact_root())
                .await
                .context("Artifact store open failed")?,
        );
        let stores = Stores {
            jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
            artifacts: artifacts.clone(),
            versions: versions.clone(),
            groups: versions.clone(),
            comparisons: versions.clone(),
            transitions: versions.clone(),
            publisher: versions,
            time: time.clone(),
            ids: ids.clone(),
        };

        // 3. Build pipeline
        let roles = Arc::new(ConfigRoleService::new(
            config.roles.admins.clone(),
            config.publish_statuses()?,
        ));
        let dispatcher = Arc::new(BuildDispatcher::new(
            stores.clone(),
            roles,
            config.dispatcher_settings(),
        ));
        let finalizer = Arc::new(ResultFinalizer::new(stores.clone()));
        let coordinator = Arc::new(BuilderCoordinator::new(
            stores.clone(),
            dispatcher.clone(),
            finalizer.clone(),
        ));
        let executor_id = config.executor_id(&node_addr).to_string();
        let processor = Arc::new(LocalBuildProcessor::new(
            stores.clone(),
            dispatcher.settings().max_file_bytes,
        ));
        let executor = Arc::new(InternalExecutor::new(
            &executor_id,
            stores.clone(),
            processor,
            finalizer,
            dispatcher.work_signal(),
        ));

        // 4. Crash recovery
        info!(executor_id = %executor_id, "Running crash recovery...");
        let recovery = Arc::new(RecoveryService::new(
            stores.jobs.clone(),
            time.clone(),
            Duration::from_secs(config.builds.deadline_sweep_interval_secs),
        ));
        match recovery.recover_startup(&executor_id).await {
            Ok(count) => info!(failed_builds = count, "Crash recovery completed"),
            Err(e) => error!(error = %e, "Crash recovery failed"),
        }

        // 5. Background loops
        let (shutdown, token) = shutdown_channel();
        let mut background = Vec::new();
        if config.builds.workers > 0 {
            background.extend(executor.spawn_workers(config.builds.workers, &token));
        } else {
            info!("No internal workers; internal builds are left to peer nodes");
        }
        {
            let recovery = recovery.clone();
            let token = token.clone();
            background.push(tokio::spawn(async move {
                recovery.run_deadline_sweeper(token).await;
            }));
        }
        let maintenance = MaintenanceScheduler::new(
            Arc::new(SqliteMaintenance::new(pool.clone(), time.clone())),
            artifacts,
            time.clone(),
            config.maintenance_config(),
            Duration::from_secs(config.maintenance.interval_hours * 3600),
        );
        {
            let token = token.clone();
            background.push(tokio::spawn(async move {
                maintenance.run(token).await;
            }));
        }

        // 6. Collaborative editing
        let balancer = Arc::new(WsLoadBalancer::new(
            Arc::new(SqliteWsDirectory::new(pool)),
            time.clone(),
            config.ws_settings(&node_addr),
        ));
        balancer
            .start()
            .await
            .context("WS directory registration failed")?;
        {
            let balancer = balancer.clone();
            let token = token.clone();
            background.push(tokio::spawn(async move {
                balancer.run_heartbeat(token).await;
            }));
        }
        let sessions = Arc::new(SessionManager::new(
            balancer.clone(),
            time.clone(),
            ids.clone(),
            config.upload_limits().branch_content_bytes as usize,
        ));

        // 7. HTTP
        let state = AppState {
            comparisons: Arc::new(ComparisonService::new(stores.clone(), dispatcher.clone())),
            catalog: Arc::new(CatalogService::new(stores)),
            dispatcher,
            coordinator,
            balancer,
            sessions,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit.burst,
                config.rate_limit.per_second,
            )),
            limits: config.upload_limits(),
            log_level,
            ready: ready.clone(),
            time,
            ids,
        };
        let server_cancel = CancellationToken::new();
        let server = {
            let app = router(state.clone());
            let cancel = server_cancel.clone();
            tokio::spawn(async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { cancel.cancelled().await })
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "HTTP server failed");
                }
            })
        };

        ready.mark_ready();
        info!(
            listen_addr = %local_addr,
            node_addr = %node_addr,
            workers = config.builds.workers,
            "Node ready"
        );

        Ok(Self {
            state,
            local_addr,
            shutdown,
            server_cancel,
            server,
            background,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address registered in the WS directory
    pub fn node_addr(&self) -> &str {
        self.state.balancer.node_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop serving, signal background loops and wait for them
    pub async fn stop(self) {
        info!(node_addr = %self.node_addr(), "Shutting down...");
        self.shutdown.shutdown();
        self.server_cancel.cancel();

        if tokio::time::timeout(STOP_TIMEOUT, self.server).await.is_err() {
            error!("HTTP server did not stop in time");
        }
        for task in self.background {
            let _ = tokio::time::timeout(STOP_TIMEOUT, task).await;
        }
        if let Err(e) = self.state.balancer.stop().await {
            error!(error = %e, "Clearing WS directory rows failed");
        }
        info!("Shutdown complete.");
    }
}
