// Shared handles passed to every HTTP handler and overlay connection.

use std::sync::Arc;
use std::time::Duration;

use sapna_core::db::RoomStore;
use sapna_core::model::Room;
use sapna_core::scoring::{rank_teams, PlayerIndex, RankedTeam};
use sapna_feed::poller::FeedSnapshot;
use sapna_feed::{MatchFeed, PollOptions, PollerRegistry};

/// How long a rankings request waits for a freshly started poller's first
/// snapshot before answering with zero scores.
pub const DEFAULT_SNAPSHOT_WAIT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RoomStore>,
    pub feed: Arc<dyn MatchFeed>,
    pub pollers: Arc<PollerRegistry>,
    pub snapshot_wait: Duration,
}

impl AppState {
    pub fn new(store: RoomStore, feed: Arc<dyn MatchFeed>, options: PollOptions) -> Self {
        let pollers = PollerRegistry::new(Arc::clone(&feed), options);
        Self {
            store: Arc::new(store),
            feed,
            pollers: Arc::new(pollers),
            snapshot_wait: DEFAULT_SNAPSHOT_WAIT,
        }
    }

    pub fn with_snapshot_wait(mut self, wait: Duration) -> Self {
        self.snapshot_wait = wait;
        self
    }
}

/// Rank a room's teams against `snapshot`. Without a snapshot every team
/// scores zero and keeps its insertion order.
pub fn rank_room(room: &Room, snapshot: Option<&FeedSnapshot>) -> Vec<RankedTeam> {
    match snapshot {
        Some(snapshot) => snapshot.rank(&room.teams),
        None => rank_teams(&room.teams, &PlayerIndex::default(), &[]),
    }
}
