//! Broker runtime: owns the broker, its listeners and background tasks.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use shv_broker::{run_sweep, Broker, BrokerConfig, ConfigError, ConfigSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::connection::ConnectionContext;
use crate::listener::{ListenAddr, Listener};
use crate::outbox::Outbox;

/// Grace period for tasks after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct BrokerRuntime {
    context: Arc<ConnectionContext>,
    source: Arc<dyn ConfigSource>,
    listen: Mutex<Vec<String>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerRuntime {
    /// Load and compile the configuration and create the broker.
    pub fn new(source: Arc<dyn ConfigSource>) -> Result<Self, ConfigError> {
        let config = source.load()?;
        Self::with_config(source, &config)
    }

    /// Create the broker from an already loaded configuration.
    pub fn with_config(source: Arc<dyn ConfigSource>, config: &BrokerConfig) -> Result<Self, ConfigError> {
        let snapshot = config.compile()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            context: Arc::new(ConnectionContext {
                broker: Arc::new(Broker::new(snapshot)),
                outbox: Arc::new(Outbox::new()),
            }),
            source,
            listen: Mutex::new(config.listen.clone()),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.context.broker)
    }

    /// Bind every listen address and start the background tasks.
    ///
    /// Returns the addresses actually bound.
    pub async fn start(&self) -> Result<Vec<ListenAddr>> {
        let urls = self.listen.lock().clone();
        let mut bound = Vec::with_capacity(urls.len());
        let mut tasks = Vec::with_capacity(urls.len() + 1);

        for url in &urls {
            let addr: ListenAddr = url.parse()?;
            let (listener, local) = Listener::bind(&addr)
                .await
                .with_context(|| format!("Failed to listen on {}", addr))?;
            info!(url = %local, "Listening");
            tasks.push(tokio::spawn(listener.run(
                Arc::clone(&self.context),
                self.shutdown_rx.clone(),
            )));
            bound.push(local);
        }

        let sweep_interval = self.context.broker.config().timeouts.sweep_interval;
        tasks.push(tokio::spawn(run_sweep(
            self.context.broker.clone(),
            self.context.outbox.clone(),
            sweep_interval,
            self.shutdown_rx.clone(),
        )));

        self.tasks.lock().extend(tasks);
        Ok(bound)
    }

    /// Re-read the configuration source and swap the broker's snapshot.
    /// On failure the previous generation stays in effect.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let result = self
            .source
            .load()
            .and_then(|config| config.compile().map(|snapshot| (config, snapshot)));
        match result {
            Ok((config, snapshot)) => {
                if *self.listen.lock() != config.listen {
                    warn!("Listen addresses changed; restart to apply");
                }
                self.context.broker.reload(snapshot);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Configuration reload failed, keeping previous");
                Err(e)
            }
        }
    }

    /// Reload on every SIGHUP until shutdown.
    #[cfg(unix)]
    pub fn spawn_reload_on_hangup(self: &Arc<Self>) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())?;
        let runtime = Arc::clone(self);
        let mut shutdown = self.shutdown_rx.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = hangup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!("SIGHUP received, reloading configuration");
                        let _ = runtime.reload();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Task did not stop within grace period");
            }
        }
        info!("Shutdown complete");
    }
}
