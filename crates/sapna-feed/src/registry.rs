// One poller per match slug, shared by every room and overlay client that
// follows that match. Pollers stop themselves once idle; finished entries are
// dropped the next time the map is touched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::client::MatchFeed;
use crate::poller::{
    wait_for_snapshot, FeedSnapshot, PollOptions, PollerHandle, RankingPoller, SnapshotReceiver,
};

pub struct PollerRegistry {
    feed: Arc<dyn MatchFeed>,
    options: PollOptions,
    pollers: Mutex<HashMap<String, PollerHandle>>,
}

impl PollerRegistry {
    pub fn new(feed: Arc<dyn MatchFeed>, options: PollOptions) -> Self {
        Self {
            feed,
            options,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> PollOptions {
        self.options
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<String, PollerHandle>> {
        self.pollers.lock().expect("poller registry mutex poisoned")
    }

    fn prune_finished(pollers: &mut HashMap<String, PollerHandle>) {
        pollers.retain(|slug, handle| {
            let running = handle.is_running();
            if !running {
                debug!(slug = %slug, "dropping finished ranking poller");
            }
            running
        });
    }

    /// Start polling `slug` unless a live poller already exists for it.
    /// Returns a receiver that sees every published snapshot; the poller
    /// stays up while that receiver lives.
    pub fn ensure(&self, slug: &str) -> SnapshotReceiver {
        let mut pollers = self.pollers();
        Self::prune_finished(&mut pollers);
        if let Some(handle) = pollers.get(slug) {
            handle.touch();
            return handle.subscribe();
        }
        let handle = RankingPoller::spawn(Arc::clone(&self.feed), slug, self.options);
        let rx = handle.subscribe();
        pollers.insert(slug.to_string(), handle);
        rx
    }

    /// Latest snapshot from a running poller for `slug`, without starting one.
    pub fn latest(&self, slug: &str) -> Option<Arc<FeedSnapshot>> {
        let pollers = self.pollers();
        pollers
            .get(slug)
            .filter(|handle| handle.is_running())
            .and_then(PollerHandle::latest)
    }

    /// Make sure `slug` is polled and return its snapshot, waiting up to
    /// `wait` for the first successful tick of a fresh poller.
    pub async fn snapshot_for(&self, slug: &str, wait: Duration) -> Option<Arc<FeedSnapshot>> {
        let rx = self.ensure(slug);
        wait_for_snapshot(rx, wait).await
    }

    /// Stop the poller for `slug`. Returns false when none was registered.
    pub async fn stop(&self, slug: &str) -> bool {
        let handle = self.pollers().remove(slug);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let handles: Vec<PollerHandle> = self
            .pollers()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.stop().await;
        }
    }

    /// Slugs with a running poller, sorted.
    pub fn active_slugs(&self) -> Vec<String> {
        let mut pollers = self.pollers();
        Self::prune_finished(&mut pollers);
        let mut slugs: Vec<String> = pollers.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FeedError, FeedResult};
    use crate::protocol::MiniScorecard;
    use async_trait::async_trait;
    use sapna_core::model::{LeaderboardPlayer, MatchPlayer, UpcomingMatch};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a one-row leaderboard whose player is named after the slug.
    #[derive(Default)]
    struct EchoFeed {
        leaderboard_calls: AtomicUsize,
    }

    #[async_trait]
    impl MatchFeed for EchoFeed {
        async fn fetch_match_players(&self, _slug: &str) -> FeedResult<Vec<MatchPlayer>> {
            Ok(vec![])
        }

        async fn fetch_leaderboard(&self, slug: &str) -> FeedResult<Vec<LeaderboardPlayer>> {
            self.leaderboard_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![LeaderboardPlayer {
                pid: "1".into(),
                name: slug.to_string(),
                raw_points: "5".into(),
                ..Default::default()
            }])
        }

        async fn fetch_scorecard(&self, _slug: &str) -> FeedResult<MiniScorecard> {
            Err(FeedError::Unsuccessful { url: "test".into() })
        }

        async fn fetch_upcoming_matches(&self) -> FeedResult<Vec<UpcomingMatch>> {
            Ok(vec![])
        }
    }

    fn registry(feed: Arc<EchoFeed>) -> PollerRegistry {
        PollerRegistry::new(feed, PollOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn one_poller_per_slug() {
        let feed = Arc::new(EchoFeed::default());
        let registry = registry(feed.clone());

        let first = registry.snapshot_for("m1", Duration::from_secs(1)).await.unwrap();
        let again = registry.snapshot_for("m1", Duration::from_secs(1)).await.unwrap();
        registry.snapshot_for("m2", Duration::from_secs(1)).await.unwrap();

        assert_eq!(first.leaderboard[0].name, "m1");
        assert_eq!(again.version, first.version);
        assert_eq!(registry.active_slugs(), vec!["m1", "m2"]);
        assert_eq!(feed.leaderboard_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn latest_does_not_start_polling() {
        let registry = registry(Arc::new(EchoFeed::default()));
        assert!(registry.latest("m1").is_none());
        assert!(registry.active_slugs().is_empty());

        registry.snapshot_for("m1", Duration::from_secs(1)).await.unwrap();
        assert!(registry.latest("m1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_removes_poller() {
        let registry = registry(Arc::new(EchoFeed::default()));
        registry.ensure("m1");

        assert!(registry.stop("m1").await);
        assert!(!registry.stop("m1").await);
        assert!(registry.active_slugs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_poller_is_reaped() {
        let feed = Arc::new(EchoFeed::default());
        let registry = registry(feed.clone());
        drop(registry.ensure("m1"));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        let calls = feed.leaderboard_calls.load(Ordering::SeqCst);
        assert!(calls <= 5, "idle poller kept fetching: {calls}");
        assert!(registry.active_slugs().is_empty());
        assert!(registry.latest("m1").is_none());

        registry.snapshot_for("m1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(registry.active_slugs(), vec!["m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn held_receiver_keeps_poller_registered() {
        let feed = Arc::new(EchoFeed::default());
        let registry = registry(feed.clone());
        let _rx = registry.ensure("m1");

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(registry.active_slugs(), vec!["m1"]);
        assert!(feed.leaderboard_calls.load(Ordering::SeqCst) > 100);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_reads_keep_poller_alive() {
        let feed = Arc::new(EchoFeed::default());
        let registry = registry(feed.clone());
        let first = registry.snapshot_for("m1", Duration::from_secs(1)).await.unwrap();

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            registry.snapshot_for("m1", Duration::from_secs(1)).await.unwrap();
        }
        let latest = registry.latest("m1").unwrap();
        assert!(latest.version > first.version);
        assert_eq!(registry.active_slugs(), vec!["m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_clears_registry() {
        let feed = Arc::new(EchoFeed::default());
        let registry = registry(feed.clone());
        registry.snapshot_for("m1", Duration::from_secs(1)).await;
        registry.snapshot_for("m2", Duration::from_secs(1)).await;

        registry.stop_all().await;
        let calls = feed.leaderboard_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(registry.active_slugs().is_empty());
        assert_eq!(feed.leaderboard_calls.load(Ordering::SeqCst), calls);
    }
}
