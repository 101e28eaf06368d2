//! Snapshot controller bootstrap
//!
//! [`Snapshotter`] prepares the cluster for the snapshot CRDs and then hands
//! control to the reconciliation loop:
//!
//! ```text
//! Idle -> ConfigResolving -> ClientsReady -> SchemaRegistering -> SchemaReady
//!      -> AwaitingReadiness -> Running -> Stopped
//! ```
//!
//! Any stage failure moves the attempt to `Failed`. The lifecycle guard is held
//! for the entire attempt, including the blocking `Running` phase, so at most
//! one attempt runs per instance at any time. A finished or failed attempt
//! releases the guard and a new attempt restarts from `Idle`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cluster::{ClientFactory, ConfigResolver};
use crate::config::BootstrapTimings;
use crate::controllers::{ControllerFactory, PluginRegistry, Runnable};
use crate::drivers::Driver;
use crate::metrics::prometheus::{BOOTSTRAP_ATTEMPTS, BOOTSTRAP_STAGE};
use crate::readiness::wait_until_ready;
use crate::schema;
use crate::{Error, Result};

/// Progress of the current (or last) bootstrap attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    ConfigResolving,
    ClientsReady,
    SchemaRegistering,
    SchemaReady,
    AwaitingReadiness,
    Running,
    Stopped,
    Failed { reason: String },
}

impl BootstrapState {
    pub fn ordinal(&self) -> i64 {
        match self {
            BootstrapState::Idle => 0,
            BootstrapState::ConfigResolving => 1,
            BootstrapState::ClientsReady => 2,
            BootstrapState::SchemaRegistering => 3,
            BootstrapState::SchemaReady => 4,
            BootstrapState::AwaitingReadiness => 5,
            BootstrapState::Running => 6,
            BootstrapState::Stopped => 7,
            BootstrapState::Failed { .. } => -1,
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::Idle => write!(f, "Idle"),
            BootstrapState::ConfigResolving => write!(f, "ConfigResolving"),
            BootstrapState::ClientsReady => write!(f, "ClientsReady"),
            BootstrapState::SchemaRegistering => write!(f, "SchemaRegistering"),
            BootstrapState::SchemaReady => write!(f, "SchemaReady"),
            BootstrapState::AwaitingReadiness => write!(f, "AwaitingReadiness"),
            BootstrapState::Running => write!(f, "Running"),
            BootstrapState::Stopped => write!(f, "Stopped"),
            BootstrapState::Failed { reason } => write!(f, "Failed: {}", reason),
        }
    }
}

/// Bootstraps the snapshot CRDs and runs the snapshot controller
pub struct Snapshotter<R, F, K> {
    driver: Arc<dyn Driver>,
    resolver: R,
    clients: F,
    controllers: K,
    timings: BootstrapTimings,
    lock: Mutex<()>,
    state: watch::Sender<BootstrapState>,
}

impl<R, F, K> Snapshotter<R, F, K>
where
    R: ConfigResolver,
    F: ClientFactory,
    K: ControllerFactory<F::Clients>,
{
    pub fn new(
        driver: Arc<dyn Driver>,
        resolver: R,
        clients: F,
        controllers: K,
        timings: BootstrapTimings,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::Idle);
        Self {
            driver,
            resolver,
            clients,
            controllers,
            timings,
            lock: Mutex::new(()),
            state,
        }
    }

    /// Current bootstrap state
    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    /// Run one full bootstrap attempt, waiting for any attempt in progress to
    /// finish first. Returns once `stop` is cancelled or a stage fails.
    pub async fn start(&self, stop: CancellationToken) -> Result<()> {
        let guard = self.lock.lock().await;
        self.attempt(guard, stop).await
    }

    /// Like [`Snapshotter::start`], but fails with
    /// [`Error::AlreadyAttemptingError`] instead of waiting.
    pub async fn try_start(&self, stop: CancellationToken) -> Result<()> {
        let guard = self
            .lock
            .try_lock()
            .map_err(|_| Error::AlreadyAttemptingError)?;
        self.attempt(guard, stop).await
    }

    async fn attempt(&self, _guard: MutexGuard<'_, ()>, stop: CancellationToken) -> Result<()> {
        self.transition(BootstrapState::Idle);

        match self.run_stages(stop).await {
            Ok(()) => {
                self.transition(BootstrapState::Stopped);
                BOOTSTRAP_ATTEMPTS.with_label_values(&["stopped"]).inc();
                info!("Snapshot controller stopped");
                Ok(())
            }
            Err(e) => {
                error!("Snapshotter bootstrap failed: {}", e);
                self.transition(BootstrapState::Failed {
                    reason: e.to_string(),
                });
                BOOTSTRAP_ATTEMPTS.with_label_values(&["failed"]).inc();
                Err(e)
            }
        }
    }

    async fn run_stages(&self, stop: CancellationToken) -> Result<()> {
        self.transition(BootstrapState::ConfigResolving);
        let config = self.resolver.resolve().await?;

        let clients = self
            .clients
            .build(config)
            .await?
            .ok_or(Error::AccountNotConfiguredError)?;
        self.transition(BootstrapState::ClientsReady);

        self.transition(BootstrapState::SchemaRegistering);
        schema::register(&clients).await?;
        self.transition(BootstrapState::SchemaReady);

        self.transition(BootstrapState::AwaitingReadiness);
        wait_until_ready(
            &clients,
            self.timings.poll_interval,
            self.timings.ready_timeout,
        )
        .await?;

        let plugins = Arc::new(PluginRegistry::for_driver(self.driver.as_ref()));
        let controller = self
            .controllers
            .build(&clients, plugins, self.timings.resync_interval);

        self.transition(BootstrapState::Running);
        info!("Starting snapshot controller for driver {}", self.driver.name());
        controller.run(stop).await
    }

    fn transition(&self, next: BootstrapState) {
        info!("Snapshotter state: {}", next);
        BOOTSTRAP_STAGE.set(next.ordinal());
        self.state.send_replace(next);
    }
}
