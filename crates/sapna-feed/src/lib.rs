// Live match data: the HTTP feed client, its wire envelopes, and the
// background pollers that keep per-match leaderboard snapshots fresh.

pub mod client;
pub mod poller;
pub mod protocol;
pub mod registry;

pub use client::{FancrazeClient, FeedError, FeedResult, MatchFeed};
pub use poller::{FeedSnapshot, PollOptions, PollerHandle, RankingPoller};
pub use registry::PollerRegistry;
