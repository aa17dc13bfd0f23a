//! The subscription-driven metrics ticker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::Rng;
use tandem_hub::SessionHandle;
use tandem_protocol::{LoadMetrics, ServerEvent, SessionId};

use crate::collector::{CounterSnapshot, MetricsCollector};

/// Ticker configuration.
#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    /// How often subscribed sessions receive a `performance_metrics`
    /// broadcast.
    pub interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

struct Subscriptions {
    sessions: HashMap<SessionId, SessionHandle>,
    /// Whether a ticker task is alive. Guards against spawning two.
    ticking: bool,
}

/// The process-wide metrics hub: subscription registry plus the ticker
/// task that serves it.
pub struct MetricsHub {
    config: MetricsConfig,
    collector: Arc<MetricsCollector>,
    subs: Mutex<Subscriptions>,
    weak: Weak<MetricsHub>,
}

impl MetricsHub {
    /// Creates a hub around the given collector.
    pub fn new(config: MetricsConfig, collector: Arc<MetricsCollector>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            collector,
            subs: Mutex::new(Subscriptions {
                sessions: HashMap::new(),
                ticking: false,
            }),
            weak: weak.clone(),
        })
    }

    /// The shared counter collector (handed to the event plane).
    pub fn collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.collector)
    }

    /// Subscribes a session. The first subscriber starts the ticker.
    pub fn subscribe(&self, session_id: SessionId, handle: SessionHandle) {
        let mut subs = self.subs.lock().expect("metrics hub poisoned");
        subs.sessions.insert(session_id.clone(), handle);
        tracing::debug!(%session_id, subscribers = subs.sessions.len(), "metrics subscription added");

        if !subs.ticking {
            subs.ticking = true;
            let weak = self.weak.clone();
            let interval = self.config.interval;
            tokio::spawn(run_ticker(weak, interval));
        }
    }

    /// Unsubscribes a session. The ticker winds down on its next tick
    /// once nobody is left.
    pub fn unsubscribe(&self, session_id: &SessionId) {
        let mut subs = self.subs.lock().expect("metrics hub poisoned");
        subs.sessions.remove(session_id);
        tracing::debug!(%session_id, subscribers = subs.sessions.len(), "metrics subscription removed");
    }

    /// Number of subscribed sessions.
    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().expect("metrics hub poisoned").sessions.len()
    }

    /// Snapshots the subscribed handles, or marks the ticker stopped
    /// and returns `None` when the map is empty.
    fn tick_targets(&self) -> Option<Vec<(SessionId, SessionHandle)>> {
        let mut subs = self.subs.lock().expect("metrics hub poisoned");
        if subs.sessions.is_empty() {
            subs.ticking = false;
            return None;
        }
        Some(
            subs.sessions
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect(),
        )
    }

    /// Drops subscriptions whose session actor is gone.
    fn prune(&self, dead: &[SessionId]) {
        if dead.is_empty() {
            return;
        }
        let mut subs = self.subs.lock().expect("metrics hub poisoned");
        for session_id in dead {
            subs.sessions.remove(session_id);
        }
    }
}

/// The ticker task body: sample, fan out, prune, repeat — until the
/// subscriber map drains.
async fn run_ticker(hub: Weak<MetricsHub>, interval: Duration) {
    tracing::debug!("metrics ticker started");
    let mut ticker = tokio::time::interval(interval);
    // The first interval tick completes immediately; skip it so the
    // first broadcast lands one full interval after subscription.
    ticker.tick().await;

    let mut previous: Option<CounterSnapshot> = None;
    let mut smoothed = SmoothedGauges::default();

    loop {
        ticker.tick().await;

        let Some(hub) = hub.upgrade() else {
            return;
        };
        let Some(targets) = hub.tick_targets() else {
            tracing::debug!("metrics ticker stopped (no subscribers)");
            return;
        };

        let current = hub.collector.snapshot();
        let metrics = compute_metrics(previous, current, interval, &mut smoothed);
        previous = Some(current);

        let mut dead = Vec::new();
        for (session_id, handle) in targets {
            let event = ServerEvent::PerformanceMetrics { metrics };
            if handle.broadcast(event).await.is_err() {
                dead.push(session_id);
            }
        }
        hub.prune(&dead);
    }
}

/// EMA state for the synthetic gauges (α = 0.2 keeps the panel calm).
struct SmoothedGauges {
    cpu: f64,
    memory: f64,
}

impl Default for SmoothedGauges {
    fn default() -> Self {
        Self {
            cpu: 10.0,
            memory: 40.0,
        }
    }
}

/// Builds one metrics row from counter deltas plus synthetic gauges.
fn compute_metrics(
    previous: Option<CounterSnapshot>,
    current: CounterSnapshot,
    interval: Duration,
    smoothed: &mut SmoothedGauges,
) -> LoadMetrics {
    let secs = interval.as_secs_f64().max(0.001);
    let (d_in, d_out, d_err) = match previous {
        Some(prev) => (
            current.events_in.saturating_sub(prev.events_in),
            current.events_out.saturating_sub(prev.events_out),
            current.errors.saturating_sub(prev.errors),
        ),
        None => (0, 0, 0),
    };

    // Events per second over the last interval.
    let network = (d_in + d_out) as f64 / secs;
    let handled = d_in.max(1);
    let error_rate = (d_err as f64 / handled as f64 * 100.0).min(100.0);

    // Synthetic gauges: a smoothed random walk biased by traffic. The
    // panel needs plausible motion, not truth.
    let mut rng = rand::rng();
    let alpha = 0.2;
    let cpu_target =
        (5.0 + network * 0.2 + rng.random_range(0.0..10.0)).clamp(0.0, 100.0);
    smoothed.cpu += alpha * (cpu_target - smoothed.cpu);
    let mem_target = (smoothed.memory + rng.random_range(-2.0..2.0)).clamp(20.0, 85.0);
    smoothed.memory += alpha * (mem_target - smoothed.memory);

    LoadMetrics {
        cpu: smoothed.cpu,
        memory: smoothed.memory,
        network,
        build_time: rng.random_range(0.8..2.5),
        active_users: current.active_users,
        server_load: (smoothed.cpu / 100.0) * (1.0 + network / 50.0),
        error_rate,
        response_time: rng.random_range(5.0..40.0) + network * 0.1,
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Ticker tests run with the clock paused: Tokio auto-advances
    //! through the 2 s interval, so the broadcasts arrive without
    //! wall-clock waiting.

    use tandem_auth::Principal;
    use tandem_hub::{HubConfig, SessionHub};
    use tandem_protocol::ConnectionId;
    use tokio::sync::mpsc;

    use super::*;

    async fn subscribed_session(
        hub: &Arc<MetricsHub>,
    ) -> (
        Arc<SessionHub>,
        SessionId,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let sessions = SessionHub::new(HubConfig {
            default_settings: tandem_protocol::SessionSettings {
                allow_guests: true,
                ..Default::default()
            },
            ..HubConfig::default()
        });
        let creator = Principal::guest();
        let created = sessions.create_session(&creator, None, None).await;

        let (tx, rx) = mpsc::unbounded_channel();
        sessions
            .join_session(&created.session_id, creator, ConnectionId(1), tx)
            .await
            .expect("join");

        let handle = sessions.resolve(&created.session_id).await.unwrap();
        hub.subscribe(created.session_id.clone(), handle);
        (sessions, created.session_id, rx)
    }

    fn metrics_hub() -> Arc<MetricsHub> {
        MetricsHub::new(
            MetricsConfig::default(),
            Arc::new(MetricsCollector::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribed_session_receives_ticks() {
        let hub = metrics_hub();
        let (_sessions, _sid, mut rx) = subscribed_session(&hub).await;

        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut ticks = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, ServerEvent::PerformanceMetrics { .. }) {
                ticks += 1;
            }
        }
        assert!(ticks >= 2, "expected >=2 ticks in 5s, got {ticks}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_emission() {
        let hub = metrics_hub();
        let (_sessions, session_id, mut rx) = subscribed_session(&hub).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        hub.unsubscribe(&session_id);
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(
            rx.try_recv().is_err(),
            "no metrics may arrive after unsubscribe"
        );
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_users_flow_through() {
        let hub = metrics_hub();
        hub.collector().set_active_users(7);
        let (_sessions, _sid, mut rx) = subscribed_session(&hub).await;

        tokio::time::sleep(Duration::from_secs(3)).await;

        let mut seen = None;
        while let Ok(ev) = rx.try_recv() {
            if let ServerEvent::PerformanceMetrics { metrics } = ev {
                seen = Some(metrics.active_users);
            }
        }
        assert_eq!(seen, Some(7));
    }

    #[test]
    fn test_compute_metrics_network_rate_from_deltas() {
        let mut smoothed = SmoothedGauges::default();
        let prev = CounterSnapshot {
            events_in: 100,
            events_out: 200,
            errors: 0,
            active_users: 2,
        };
        let curr = CounterSnapshot {
            events_in: 120,
            events_out: 240,
            errors: 6,
            active_users: 2,
        };

        let m = compute_metrics(Some(prev), curr, Duration::from_secs(2), &mut smoothed);

        // (20 in + 40 out) / 2 s = 30 events/s.
        assert!((m.network - 30.0).abs() < f64::EPSILON);
        // 6 errors over 20 handled = 30 %.
        assert!((m.error_rate - 30.0).abs() < f64::EPSILON);
        assert_eq!(m.active_users, 2);
    }

    #[test]
    fn test_compute_metrics_first_tick_has_no_rates() {
        let mut smoothed = SmoothedGauges::default();
        let curr = CounterSnapshot {
            events_in: 500,
            events_out: 900,
            errors: 3,
            active_users: 1,
        };

        let m = compute_metrics(None, curr, Duration::from_secs(2), &mut smoothed);

        assert_eq!(m.network, 0.0);
        assert_eq!(m.error_rate, 0.0);
    }
}
