// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-interval polling driver.
//!
//! The scheduler owns the tracked set and runs in a single background task.
//! Each tick fetches one snapshot (the only suspension point) and then
//! reconciles it synchronously, so an epoch is atomic. At most one cycle is in
//! flight: ticks that fire while a fetch is still running are dropped, never
//! queued. Transport and parse failures are logged, counted in the published
//! [`PollStatus`], and leave the tracked set untouched.
//!
//! Subscribers receive one [`Epoch`] per successful cycle, so a busy snapshot
//! with hundreds of events still occupies a single channel slot.

mod http;

pub use http::{HttpFeed, DEFAULT_REQUEST_TIMEOUT, USER_AGENT};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::protocol::{AircraftJsonParser, ParseError};
use crate::tracker::{ConfigError, Epoch, ReconciliationEngine, TrackedSet, TrackerConfig};

/// Errors fetching a snapshot body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("feed returned HTTP {0}")]
    Status(u16),

    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

/// Errors that skip an epoch. Both are recoverable.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A source of snapshot bodies.
///
/// Implement this for anything that can produce an `aircraft.json` document:
/// HTTP endpoints, files, or scripted sources in tests.
pub trait FeedSource: Send + Sync + 'static {
    /// Fetch one snapshot body.
    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;

    /// Human-readable description for log lines.
    fn describe(&self) -> String;
}

/// Configuration for the poll scheduler.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Time between ingestion attempts.
    pub interval: Duration,
    /// Broadcast channel capacity, in epochs.
    pub event_channel_capacity: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            event_channel_capacity: 256,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        Ok(())
    }
}

/// Health of the feed as seen by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedState {
    /// No cycle has completed yet.
    #[default]
    Idle,
    /// The last cycle succeeded.
    Healthy,
    /// The last cycle failed; tracked state is frozen at the last success.
    Failing,
}

/// Counters and last-outcome details published after every cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollStatus {
    pub state: FeedState,
    /// Successfully processed epochs.
    pub epochs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Ticks dropped because a cycle was still in flight.
    pub skipped_ticks: u64,
    /// Aircraft in the tracked set after the last cycle.
    pub tracked: usize,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchError>> + Send>>;

/// Polls a [`FeedSource`] and feeds the reconciliation engine.
pub struct PollScheduler<S> {
    source: Arc<S>,
    parser: AircraftJsonParser,
    engine: ReconciliationEngine,
    tracked: TrackedSet,
    config: PollConfig,
    event_tx: broadcast::Sender<Arc<Epoch>>,
    status_tx: watch::Sender<PollStatus>,
}

impl<S: FeedSource> std::fmt::Debug for PollScheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("source", &self.source.describe())
            .field("tracked", &self.tracked.len())
            .field("interval", &self.config.interval)
            .finish_non_exhaustive()
    }
}

impl<S: FeedSource> PollScheduler<S> {
    /// Create a scheduler. Invalid configuration is refused here.
    pub fn new(source: S, tracker: TrackerConfig, config: PollConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = ReconciliationEngine::new(tracker)?;
        let tracked = engine.new_tracked_set();
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let (status_tx, _) = watch::channel(PollStatus::default());

        Ok(Self {
            source: Arc::new(source),
            parser: AircraftJsonParser::new(),
            engine,
            tracked,
            config,
            event_tx,
            status_tx,
        })
    }

    /// Subscribe to reconciled epochs. Each carries its events in order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Epoch>> {
        self.event_tx.subscribe()
    }

    /// Watch the poll status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<PollStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn tracked(&self) -> &TrackedSet {
        &self.tracked
    }

    /// Run exactly one fetch/parse/reconcile cycle.
    pub async fn poll_once(&mut self) -> Result<Arc<Epoch>, PollError> {
        let result = self.source.fetch().await;
        self.complete(result)
    }

    /// Spawn the polling loop on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> PollHandle<S> {
        let cancel_token = CancellationToken::new();
        let event_tx = self.event_tx.clone();
        let status_rx = self.status_tx.subscribe();

        let task_cancel = cancel_token.clone();
        let task = tokio::spawn(self.run(task_cancel));

        PollHandle {
            cancel_token,
            task: Some(task),
            event_tx,
            status_rx,
        }
    }

    /// Poll until `cancel_token` fires, then hand the scheduler back.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Self {
        info!(
            "Polling {} every {} ms",
            self.source.describe(),
            self.config.interval.as_millis()
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<FetchFuture> = None;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("Polling of {} stopped", self.source.describe());
                    return self;
                }

                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        debug!("Previous poll still in flight, skipping tick");
                        self.status_tx.send_modify(|status| status.skipped_ticks += 1);
                    } else {
                        let source = Arc::clone(&self.source);
                        in_flight = Some(Box::pin(async move { source.fetch().await }));
                    }
                }

                result = wait_in_flight(&mut in_flight) => {
                    in_flight = None;
                    // Failures are already logged and published
                    let _ = self.complete(result);
                }
            }
        }
    }

    /// Parse and reconcile a fetched body, publishing events and status.
    fn complete(
        &mut self,
        fetched: Result<Vec<u8>, FetchError>,
    ) -> Result<Arc<Epoch>, PollError> {
        let now = Utc::now();
        let outcome = fetched.map_err(PollError::from).and_then(|body| {
            self.engine
                .ingest(&mut self.parser, &body, &mut self.tracked, now)
                .map_err(PollError::from)
        });

        match outcome {
            Ok(epoch) => {
                debug!(
                    "Epoch: {} created, {} updated, {} retired, {} rejected, {} tracked",
                    epoch.created.len(),
                    epoch.updated.len(),
                    epoch.retired.len(),
                    epoch.rejected.total(),
                    self.tracked.len()
                );
                let epoch = Arc::new(epoch);
                // No subscribers is fine
                let _ = self.event_tx.send(Arc::clone(&epoch));
                let tracked = self.tracked.len();
                self.status_tx.send_modify(|status| {
                    status.state = FeedState::Healthy;
                    status.epochs += 1;
                    status.consecutive_failures = 0;
                    status.tracked = tracked;
                    status.last_success = Some(now);
                    status.last_error = None;
                });
                Ok(epoch)
            }
            Err(e) => {
                warn!("Poll of {} failed: {}", self.source.describe(), e);
                let message = e.to_string();
                self.status_tx.send_modify(|status| {
                    status.state = FeedState::Failing;
                    status.failures += 1;
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_error = Some(message);
                });
                Err(e)
            }
        }
    }
}

async fn wait_in_flight(slot: &mut Option<FetchFuture>) -> Result<Vec<u8>, FetchError> {
    match slot {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

/// Handle to a running poll loop.
///
/// Dropping the handle stops polling.
pub struct PollHandle<S> {
    cancel_token: CancellationToken,
    task: Option<JoinHandle<PollScheduler<S>>>,
    event_tx: broadcast::Sender<Arc<Epoch>>,
    status_rx: watch::Receiver<PollStatus>,
}

impl<S> std::fmt::Debug for PollHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl<S: FeedSource> PollHandle<S> {
    /// Subscribe to reconciled epochs. Each carries its events in order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Epoch>> {
        self.event_tx.subscribe()
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> PollStatus {
        self.status_rx.borrow().clone()
    }

    /// Stop polling. An in-flight fetch is abandoned.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Stop polling and wait for the loop to exit, recovering the scheduler.
    pub async fn join(mut self) -> Option<PollScheduler<S>> {
        self.cancel_token.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(scheduler) => Some(scheduler),
            Err(e) => {
                warn!("Poll task ended abnormally: {e}");
                None
            }
        }
    }
}

impl<S> Drop for PollHandle<S> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerEvent;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const BODY_A: &str = r#"{"aircraft": [{"hex": "A", "lat": 39.5, "lon": -8.0, "seen": 5}]}"#;
    const BODY_EMPTY: &str = r#"{"aircraft": []}"#;

    /// Feed that replays scripted responses, then repeats the last one.
    struct ScriptedFeed {
        responses: Mutex<VecDeque<Result<Vec<u8>, FetchError>>>,
        delay: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<Result<&str, &str>>, delay: Duration) -> Self {
            let responses = responses
                .into_iter()
                .map(|r| match r {
                    Ok(body) => Ok(body.as_bytes().to_vec()),
                    Err(reason) => Err(FetchError::Unavailable(reason.to_string())),
                })
                .collect();
            Self {
                responses: Mutex::new(responses),
                delay,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn next_response(&self) -> Result<Vec<u8>, FetchError> {
            let mut responses = self.responses.lock().unwrap();
            match responses.len() {
                0 => Ok(BODY_EMPTY.as_bytes().to_vec()),
                1 => match responses.front().unwrap() {
                    Ok(body) => Ok(body.clone()),
                    Err(e) => Err(FetchError::Unavailable(e.to_string())),
                },
                _ => responses.pop_front().unwrap(),
            }
        }
    }

    impl FeedSource for ScriptedFeed {
        fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(active, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.next_response()
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn scheduler(feed: ScriptedFeed, interval_ms: u64) -> PollScheduler<ScriptedFeed> {
        PollScheduler::new(
            feed,
            TrackerConfig::default(),
            PollConfig {
                interval: Duration::from_millis(interval_ms),
                ..PollConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_poll_once_then_empty_retires() {
        let feed = ScriptedFeed::new(vec![Ok(BODY_A), Ok(BODY_EMPTY)], Duration::ZERO);
        let mut scheduler = scheduler(feed, 1000);
        let mut events = scheduler.subscribe();

        let epoch = scheduler.poll_once().await.unwrap();
        assert_eq!(epoch.created.len(), 1);
        let published = events.recv().await.unwrap();
        assert!(Arc::ptr_eq(&epoch, &published));
        assert!(matches!(&published.events[0], TrackerEvent::Created(e) if e.id == "A"));

        let epoch = scheduler.poll_once().await.unwrap();
        assert_eq!(epoch.retired, vec!["A".to_string()]);
        assert!(scheduler.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_failures_freeze_tracked_state() {
        let feed = ScriptedFeed::new(
            vec![Ok(BODY_A), Err("connection refused"), Ok("not json"), Ok(BODY_A)],
            Duration::ZERO,
        );
        let mut scheduler = scheduler(feed, 1000);
        let status = scheduler.status();

        scheduler.poll_once().await.unwrap();
        let before = scheduler.tracked().get("A").cloned();

        assert!(matches!(
            scheduler.poll_once().await,
            Err(PollError::Fetch(FetchError::Unavailable(_)))
        ));
        assert!(matches!(scheduler.poll_once().await, Err(PollError::Parse(_))));
        assert_eq!(scheduler.tracked().get("A").cloned(), before);

        {
            let current = status.borrow();
            assert_eq!(current.state, FeedState::Failing);
            assert_eq!(current.failures, 2);
            assert_eq!(current.consecutive_failures, 2);
            assert_eq!(current.epochs, 1);
            assert!(current.last_error.is_some());
        }

        let epoch = scheduler.poll_once().await.unwrap();
        assert_eq!(epoch.updated.len(), 1);
        assert!(epoch.retired.is_empty());
        let current = status.borrow();
        assert_eq!(current.state, FeedState::Healthy);
        assert_eq!(current.consecutive_failures, 0);
        assert_eq!(current.tracked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_dropped() {
        // Each fetch takes 3.5 intervals
        let feed = ScriptedFeed::new(vec![Ok(BODY_A)], Duration::from_millis(3500));
        let scheduler = scheduler(feed, 1000);
        let source = Arc::clone(&scheduler.source);

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        let status = handle.status();
        let scheduler = handle.join().await.unwrap();

        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        assert!(status.skipped_ticks >= 4);
        assert!(status.epochs >= 2);
        assert!(source.calls.load(Ordering::SeqCst) <= 3);
        assert!(scheduler.tracked().contains("A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let feed = ScriptedFeed::new(vec![Ok(BODY_A)], Duration::ZERO);
        let scheduler = scheduler(feed, 1000);
        let source = Arc::clone(&scheduler.source);

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.stop();
        let calls = source.calls.load(Ordering::SeqCst);
        assert_eq!(calls, 3);

        let scheduler = handle.join().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
        assert_eq!(scheduler.tracked().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_handle_subscribers() {
        let feed = ScriptedFeed::new(vec![Ok(BODY_A), Ok(BODY_EMPTY)], Duration::ZERO);
        let handle = scheduler(feed, 1000).start();
        let mut events = handle.subscribe();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let epoch = events.recv().await.unwrap();
            for event in &epoch.events {
                match event {
                    TrackerEvent::Created(e) => seen.push(format!("created:{}", e.id)),
                    TrackerEvent::Retired(id) => seen.push(format!("retired:{id}")),
                    TrackerEvent::NearestChanged { id, .. } => seen.push(format!("nearest:{id}")),
                    TrackerEvent::Updated(_) | TrackerEvent::TrailChanged { .. } => {}
                }
            }
        }
        assert_eq!(seen, vec!["created:A", "nearest:A", "retired:A"]);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_epoch_delivers_every_event() {
        // Far more events per epoch than channel slots
        let records: Vec<String> = (0..300)
            .map(|i| {
                format!(
                    r#"{{"hex": "{i:06x}", "lat": {}, "lon": -8.0, "seen": 1}}"#,
                    39.0 + f64::from(i) * 0.001
                )
            })
            .collect();
        let body = format!(r#"{{"aircraft": [{}]}}"#, records.join(","));
        let feed = ScriptedFeed::new(vec![Ok(body.as_str())], Duration::ZERO);
        let scheduler = PollScheduler::new(
            feed,
            TrackerConfig::default(),
            PollConfig {
                interval: Duration::from_millis(1000),
                event_channel_capacity: 4,
            },
        )
        .unwrap();

        let handle = scheduler.start();
        let mut events = handle.subscribe();

        let first = events.recv().await.unwrap();
        let created = first
            .events
            .iter()
            .filter(|e| matches!(e, TrackerEvent::Created(_)))
            .count();
        assert_eq!(created, 300);
        assert!(first.events.len() > 4);

        let second = events.recv().await.unwrap();
        let updated = second
            .events
            .iter()
            .filter(|e| matches!(e, TrackerEvent::Updated(_)))
            .count();
        assert_eq!(updated, 300);
        assert!(second.retired.is_empty());
        handle.stop();
    }

    #[test]
    fn test_config_validation() {
        let zero_interval = PollConfig {
            interval: Duration::ZERO,
            ..PollConfig::default()
        };
        assert_eq!(zero_interval.validate(), Err(ConfigError::ZeroPollInterval));

        let zero_channel = PollConfig {
            event_channel_capacity: 0,
            ..PollConfig::default()
        };
        assert_eq!(zero_channel.validate(), Err(ConfigError::ZeroChannelCapacity));

        let feed = ScriptedFeed::new(Vec::new(), Duration::ZERO);
        assert!(PollScheduler::new(feed, TrackerConfig::default(), zero_interval).is_err());
    }
}
