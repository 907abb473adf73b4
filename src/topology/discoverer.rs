use arc_swap::ArcSwap;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::aggregator::Aggregator;
use super::component::{Component, Snapshot};
use super::subscriber::{Mailbox, SubscriberRegistry, TopologySubscriber};
use crate::config::Config;
use crate::error::{TopologyError, TopologyResult};
use crate::service_discovery::{ComponentSource, PdClient, PdSource, StoreSource, TidbSource};
use crate::tls::TlsMaterial;

/// Default period between two topology reloads
pub const DEFAULT_DISCOVER_INTERVAL: Duration = Duration::from_secs(30);

/// Pause before the supervisor restarts a control loop that panicked
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Periodically rebuilds the cluster topology and fans it out to subscribers.
///
/// Each cycle queries TiDB servers from etcd, then PD members, then TiKV and
/// TiFlash stores, with one deadline equal to the refresh interval. A cycle
/// that fails leaves the previous snapshot in place; subscribers are notified
/// after every cycle either way.
#[derive(Debug)]
pub struct TopologyDiscoverer {
    shared: Arc<Shared>,
    started: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    aggregator: Aggregator,
    components: ArcSwap<Vec<Component>>,
    subscribers: SubscriberRegistry,
    refresh: Notify,
    closed: CancellationToken,
    interval: Duration,
}

impl TopologyDiscoverer {
    /// Build the registry clients for `config`. No query is issued yet.
    pub async fn new(config: &Config) -> TopologyResult<Self> {
        let endpoints = &config.pd.endpoints;
        if endpoints.is_empty() {
            return Err(TopologyError::config(
                "unexpected empty pd endpoints, please specify at least one pd endpoint",
            ));
        }

        let tls = TlsMaterial::load(&config.security)?;
        let scheme = config.http_scheme();
        let connect_timeout = config.discovery.connect_timeout_duration();

        let pd_client = Arc::new(PdClient::new(
            &endpoints[0],
            scheme,
            tls.as_ref(),
            connect_timeout,
        )?);
        let tidb = TidbSource::connect(endpoints, scheme, tls.as_ref(), connect_timeout).await?;

        info!(
            pd_endpoints = ?endpoints,
            scheme = scheme,
            interval_secs = config.discovery.refresh_interval,
            "topology discoverer created"
        );

        let sources: Vec<Arc<dyn ComponentSource>> = vec![
            Arc::new(tidb),
            Arc::new(PdSource::new(Arc::clone(&pd_client))),
            Arc::new(StoreSource::new(pd_client)),
        ];
        Self::with_sources(sources, config.discovery.refresh_duration())
    }

    /// Build a discoverer over arbitrary sources, queried in the given order
    pub fn with_sources(
        sources: Vec<Arc<dyn ComponentSource>>,
        interval: Duration,
    ) -> TopologyResult<Self> {
        if interval.is_zero() {
            return Err(TopologyError::config(
                "topology refresh interval must be greater than 0",
            ));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                aggregator: Aggregator::new(sources),
                components: ArcSwap::from_pointee(Vec::new()),
                subscribers: SubscriberRegistry::new(),
                refresh: Notify::new(),
                closed: CancellationToken::new(),
                interval,
            }),
            started: AtomicBool::new(false),
            supervisor: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Register a new mailbox and ask the control loop for an early refresh.
    ///
    /// Never blocks on the loop; several calls close together share one
    /// refresh.
    pub fn subscribe(&self) -> Mailbox {
        let mailbox = self.shared.subscribers.register();
        self.shared.refresh.notify_one();
        mailbox
    }

    /// Spawn the control loop. Must be called from within a tokio runtime.
    ///
    /// The loop's events are recorded inside the span current at this call.
    pub fn start(&self) -> TopologyResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TopologyError::AlreadyStarted);
        }

        let handle = tokio::spawn(supervise(Arc::clone(&self.shared)).in_current_span());
        *self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop the control loop and release the registry clients.
    ///
    /// An in-flight cycle is abandoned. Mailboxes already handed out stay
    /// readable but receive nothing further.
    pub async fn close(&self) -> TopologyResult<()> {
        self.shared.closed.cancel();

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "topology supervisor ended abnormally");
            }
        }

        self.shared.aggregator.close().await?;
        info!("topology discoverer closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Snapshot {
        self.shared.components.load_full()
    }
}

impl TopologySubscriber for TopologyDiscoverer {
    fn subscribe(&self) -> Mailbox {
        TopologyDiscoverer::subscribe(self)
    }
}

impl Shared {
    async fn load_topology(&self) -> TopologyResult<Snapshot> {
        let deadline = Instant::now() + self.interval;
        let components = self.aggregator.aggregate(deadline).await?;

        let snapshot = Arc::new(components);
        self.components.store(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn notify_subscribers(&self) {
        let snapshot = self.components.load_full();
        let delivered = self.subscribers.publish_all(&snapshot);
        debug!(
            subscribers = delivered,
            components = snapshot.len(),
            "topology published"
        );
    }
}

/// Outcome of one refresh cycle
enum Cycle {
    Loaded(Snapshot),
    Failed(TopologyError),
    Panicked,
    Closed,
}

/// Run one refresh on its own task so a panicking source cannot take the
/// loop down, then notify subscribers.
async fn run_cycle(shared: &Arc<Shared>) -> Cycle {
    let worker = Arc::clone(shared);
    let handle = tokio::spawn(async move { worker.load_topology().await }.in_current_span());
    let abort = handle.abort_handle();

    let joined = tokio::select! {
        _ = shared.closed.cancelled() => {
            abort.abort();
            return Cycle::Closed;
        }
        joined = handle => joined,
    };

    let outcome = match joined {
        Ok(Ok(snapshot)) => Cycle::Loaded(snapshot),
        Ok(Err(e)) => Cycle::Failed(e),
        Err(e) if e.is_panic() => {
            error!(panic = %panic_message(e.into_panic()), "load topology panicked");
            Cycle::Panicked
        }
        Err(_) => return Cycle::Closed,
    };

    shared.notify_subscribers();
    outcome
}

async fn control_loop(shared: Arc<Shared>) {
    match run_cycle(&shared).await {
        Cycle::Loaded(snapshot) => info!(components = ?snapshot, "first load topology"),
        Cycle::Failed(e) => error!(
            error = %e,
            severity = %e.severity(),
            retryable = e.is_retryable(),
            "first load topology failed"
        ),
        Cycle::Panicked => {}
        Cycle::Closed => return,
    }

    let mut ticker = interval_at(Instant::now() + shared.interval, shared.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.closed.cancelled() => break,
            _ = ticker.tick() => {}
            _ = shared.refresh.notified() => debug!("topology refresh requested"),
        }

        match run_cycle(&shared).await {
            Cycle::Loaded(snapshot) => debug!(components = ?snapshot, "load topology success"),
            Cycle::Failed(e) => error!(
                error = %e,
                severity = %e.severity(),
                retryable = e.is_retryable(),
                "load topology failed"
            ),
            Cycle::Panicked => {}
            Cycle::Closed => break,
        }
    }

    debug!("topology control loop stopped");
}

/// Keep the control loop alive across panics until the discoverer closes
async fn supervise(shared: Arc<Shared>) {
    loop {
        let joined = tokio::spawn(control_loop(Arc::clone(&shared)).in_current_span()).await;

        match joined {
            Ok(()) => return,
            Err(e) if e.is_panic() => {
                error!(
                    panic = %panic_message(e.into_panic()),
                    "topology control loop panicked, restarting"
                );
            }
            Err(_) => return,
        }

        tokio::select! {
            _ = shared.closed.cancelled() => return,
            _ = tokio::time::sleep(RESTART_BACKOFF) => {}
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
