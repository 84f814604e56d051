//! Main application orchestration.
//!
//! One task owns the connection manager and applies engine events in the
//! order they were queued. Metrics are brought up to date after every event
//! and a performance line is logged on a fixed interval.

use crate::config::AppConfig;
use crate::error::AppResult;
use finstream_core::{Clock, SystemClock};
use finstream_feed::{SharedStore, StateStore};
use finstream_telemetry::Metrics;
use finstream_ws::{
    ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus, CredentialProvider,
    EngineEvent, StompTransportFactory, TransportFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pushes store and connection counters into Prometheus as deltas.
#[derive(Debug, Default)]
pub struct MetricsSync {
    state: Option<ConnectionState>,
    retries_scheduled: u64,
    manual_reconnects: u64,
    parse_errors: u64,
    total_updates: u64,
    rejected_updates: u64,
    notifications: u64,
}

impl MetricsSync {
    pub fn sync(&mut self, status: &ConnectionStatus, store: &StateStore) {
        if self.state != Some(status.state) {
            Metrics::connection_state_set(status.state.as_str());
            if status.is_connected() {
                Metrics::ws_connected();
            } else {
                Metrics::ws_disconnected();
            }
            if status.state == ConnectionState::Reconnecting {
                self.manual_reconnects += 1;
                Metrics::reconnects_scheduled("manual", 1);
            }
            self.state = Some(status.state);
        }

        let retries = status.retries_scheduled.saturating_sub(self.retries_scheduled);
        if retries > 0 {
            Metrics::reconnects_scheduled("backoff", retries);
            self.retries_scheduled = status.retries_scheduled;
        }

        let parse_errors = status.parse_errors.saturating_sub(self.parse_errors);
        if parse_errors > 0 {
            Metrics::parse_errors(parse_errors);
            self.parse_errors = status.parse_errors;
        }

        let snapshot = store.performance_snapshot();
        let accepted = snapshot.total_updates.saturating_sub(self.total_updates);
        if accepted > 0 {
            Metrics::ticks_accepted(accepted);
            self.total_updates = snapshot.total_updates;
        }
        let rejected = snapshot.rejected_updates.saturating_sub(self.rejected_updates);
        if rejected > 0 {
            Metrics::ticks_rejected(rejected);
            self.rejected_updates = snapshot.rejected_updates;
        }
        Metrics::symbols_tracked(snapshot.symbol_count);
        Metrics::updates_per_second(snapshot.updates_per_second);

        // The buffer is newest first; the fresh ones are at the front. Any
        // already evicted are counted in the total but not by severity.
        let fresh = snapshot
            .notifications_received
            .saturating_sub(self.notifications);
        if fresh > 0 {
            let visible = usize::try_from(fresh).unwrap_or(usize::MAX);
            for record in store.notifications().take(visible) {
                Metrics::notification_received(record.severity.as_str());
            }
            self.notifications = snapshot.notifications_received;
        }
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    store: SharedStore,
    manager: ConnectionManager,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    metrics: MetricsSync,
}

impl Application {
    /// Build the application with the STOMP transport and the configured
    /// credential.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let credentials = Arc::new(config.auth.credentials());
        Ok(Self::with_parts(
            config,
            credentials,
            Arc::new(StompTransportFactory::new()),
            Arc::new(SystemClock),
        ))
    }

    /// Build the application from explicit capabilities.
    pub fn with_parts(
        config: AppConfig,
        credentials: Arc<dyn CredentialProvider>,
        factory: Arc<dyn TransportFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = StateStore::with_clock(config.store.clone(), clock).shared();
        let (manager, events) = ConnectionManager::new(
            config.connection.clone(),
            credentials,
            factory,
            store.clone(),
        );
        Self {
            config,
            store,
            manager,
            events,
            metrics: MetricsSync::default(),
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.manager.handle()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    /// Apply one engine event and refresh metrics.
    pub fn handle_event(&mut self, event: EngineEvent) {
        self.manager.handle_event(event);
        self.sync_metrics();
    }

    fn sync_metrics(&mut self) {
        let status = self.manager.status();
        let store = self.store.read();
        self.metrics.sync(&status, &store);
    }

    /// Log one performance line.
    pub fn log_performance(&self) {
        let snapshot = self.store.read().performance_snapshot();
        let status = self.manager.status();
        info!(
            state = %status.state,
            symbols = snapshot.symbol_count,
            total_updates = snapshot.total_updates,
            updates_per_second = format!("{:.2}", snapshot.updates_per_second),
            rejected = snapshot.rejected_updates,
            errors = snapshot.buffered_errors,
            last_update = ?snapshot.last_update,
            "Performance"
        );
    }

    /// Connect and process events until Ctrl-C.
    pub async fn run(mut self) -> AppResult<()> {
        info!(
            url = %self.config.connection.url,
            symbols = ?self.config.store.default_symbols,
            "Starting application"
        );

        self.manager.connect();
        self.sync_metrics();

        let period = Duration::from_secs(self.config.stats.interval_secs);
        let mut stats_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        info!("Entering main event loop");
        loop {
            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                }

                _ = stats_interval.tick() => {
                    self.log_performance();
                }

                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for shutdown signal");
                    }
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.manager.disconnect();
        self.sync_metrics();
        self.log_performance();
        debug!(metrics = %Metrics::render()?, "Final metrics");
        info!(
            notifications = self.metrics.notifications,
            manual_reconnects = self.metrics.manual_reconnects,
            "Shut down"
        );
        Ok(())
    }
}
