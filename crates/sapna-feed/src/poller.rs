// Periodic leaderboard refresh for one match.
//
// Each poller owns a background task that fetches the player mapping and the
// fantasy-points leaderboard on a fixed interval and publishes the result on a
// watch channel. Readers always see the last successful snapshot; a failed
// tick is logged and leaves it untouched. A poller nobody has watched or
// touched for `idle_timeout` stops itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use sapna_core::config::RefreshConfig;
use sapna_core::model::{LeaderboardPlayer, Team};
use sapna_core::scoring::{rank_teams, PlayerIndex, RankedTeam};

use crate::client::MatchFeed;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// FeedSnapshot
// ---------------------------------------------------------------------------

/// Feed data for one match as of the last successful tick.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub slug: String,
    pub players: PlayerIndex,
    pub leaderboard: Vec<LeaderboardPlayer>,
    pub refreshed_at: DateTime<Utc>,
    /// Number of snapshots published by this poller, starting at 1.
    pub version: u64,
}

impl FeedSnapshot {
    pub fn rank(&self, teams: &[Team]) -> Vec<RankedTeam> {
        rank_teams(teams, &self.players, &self.leaderboard)
    }
}

pub type SnapshotReceiver = watch::Receiver<Option<Arc<FeedSnapshot>>>;

/// Wait until `rx` holds a snapshot, giving up after `timeout`.
pub async fn wait_for_snapshot(
    mut rx: SnapshotReceiver,
    timeout: Duration,
) -> Option<Arc<FeedSnapshot>> {
    // Timed out, or the poller stopped before its first successful tick.
    let snapshot = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
        Ok(Ok(current)) => current.as_ref().map(Arc::clone),
        _ => None,
    };
    snapshot
}

// ---------------------------------------------------------------------------
// PollOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Re-fetch the name -> id mapping on every tick instead of only until
    /// the first successful fetch.
    pub refresh_mapping_each_tick: bool,
    /// How long the poller keeps running with no subscribers and no
    /// `touch` before it stops on its own.
    pub idle_timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            refresh_mapping_each_tick: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl PollOptions {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            interval: config.interval(),
            refresh_mapping_each_tick: config.refresh_mapping_each_tick,
            idle_timeout: config.idle_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// RankingPoller
// ---------------------------------------------------------------------------

pub struct RankingPoller;

impl RankingPoller {
    /// Start polling `slug`. The first fetch happens immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        feed: Arc<dyn MatchFeed>,
        slug: impl Into<String>,
        options: PollOptions,
    ) -> PollerHandle {
        let slug = slug.into();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let demand = Arc::new(AtomicBool::new(true));

        info!(
            slug = %slug,
            interval_secs = options.interval.as_secs(),
            "starting ranking poller"
        );
        let task = tokio::spawn(poll_loop(
            feed,
            slug.clone(),
            options,
            snapshot_tx,
            stop_rx,
            Arc::clone(&demand),
        ));

        PollerHandle {
            slug,
            snapshot_rx,
            demand,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }
}

async fn poll_loop(
    feed: Arc<dyn MatchFeed>,
    slug: String,
    options: PollOptions,
    snapshot_tx: watch::Sender<Option<Arc<FeedSnapshot>>>,
    mut stop_rx: oneshot::Receiver<()>,
    demand: Arc<AtomicBool>,
) {
    let mut ticker = interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut players: Option<PlayerIndex> = None;
    let mut version = 0u64;
    let mut idle_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            now = ticker.tick() => {
                // The handle keeps one receiver of its own.
                let watched = snapshot_tx.receiver_count() > 1;
                if demand.swap(false, Ordering::AcqRel) || watched {
                    idle_since = None;
                } else {
                    let since = *idle_since.get_or_insert(now);
                    if now.duration_since(since) >= options.idle_timeout {
                        info!(slug = %slug, "no watchers, stopping idle ranking poller");
                        break;
                    }
                }

                if players.is_none() || options.refresh_mapping_each_tick {
                    match feed.fetch_match_players(&slug).await {
                        Ok(list) => {
                            let index = PlayerIndex::build(&list);
                            debug!(slug = %slug, mapped = index.len(), "player mapping refreshed");
                            players = Some(index);
                        }
                        Err(e) => warn!(slug = %slug, "failed to fetch player mapping: {e}"),
                    }
                }

                match feed.fetch_leaderboard(&slug).await {
                    Ok(leaderboard) => {
                        version += 1;
                        debug!(slug = %slug, rows = leaderboard.len(), version, "leaderboard refreshed");
                        snapshot_tx.send_replace(Some(Arc::new(FeedSnapshot {
                            slug: slug.clone(),
                            players: players.clone().unwrap_or_default(),
                            leaderboard,
                            refreshed_at: Utc::now(),
                            version,
                        })));
                    }
                    Err(e) => warn!(slug = %slug, "failed to fetch leaderboard, keeping previous snapshot: {e}"),
                }
            }
        }
    }

    info!(slug = %slug, "ranking poller stopped");
}

// ---------------------------------------------------------------------------
// PollerHandle
// ---------------------------------------------------------------------------

/// Owner of a running poller. Dropping the handle aborts the task.
pub struct PollerHandle {
    slug: String,
    snapshot_rx: SnapshotReceiver,
    demand: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Last published snapshot, if any tick has succeeded yet.
    pub fn latest(&self) -> Option<Arc<FeedSnapshot>> {
        self.snapshot_rx.borrow().as_ref().map(Arc::clone)
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshot_rx.clone()
    }

    /// Record a one-off read so the poller does not count as idle this tick.
    pub fn touch(&self) {
        self.demand.store(true, Ordering::Release);
    }

    pub async fn wait_for_snapshot(&self, timeout: Duration) -> Option<Arc<FeedSnapshot>> {
        wait_for_snapshot(self.subscribe(), timeout).await
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Ask the loop to exit and wait for it. An in-flight fetch is allowed to
    /// finish first.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(slug = %self.slug, "ranking poller task failed: {e}");
                }
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
