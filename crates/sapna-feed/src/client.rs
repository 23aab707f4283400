// HTTP client for the third-party match data API.
//
// The scoring engine only needs two feeds (match players and the live
// fantasy-points leaderboard); the scorecard and upcoming-match listings are
// passed through for display and room creation.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use sapna_core::config::FeedConfig;
use sapna_core::model::{LeaderboardPlayer, MatchPlayer, UpcomingMatch};

use crate::protocol::{
    LeaderboardResponse, MatchPlayersResponse, MiniScorecard, ScorecardResponse,
    UpcomingMatchesResponse,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://apis.fancraze.com";

const MATCH_PLAYERS_PATH: &str = "/v1_3/getMatchPlayers";
const LEADERBOARD_PATH: &str = "/challenge3/challenge/V3/getFantasyPointLeaderboard";
const SCORECARD_PATH: &str = "/challenge3/challenge/V3/getMiniScoreCardBySlug";
const UPCOMING_PATH: &str = "/challenge3/challenge/V3/getChallengeMatchesBff";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{url} reported an unsuccessful response")]
    Unsuccessful { url: String },
}

// ---------------------------------------------------------------------------
// MatchFeed
// ---------------------------------------------------------------------------

/// Source of live match data. Implemented over HTTP by [`FancrazeClient`]
/// and by scripted fakes in tests.
#[async_trait]
pub trait MatchFeed: Send + Sync {
    /// Players registered for the match, in feed order.
    async fn fetch_match_players(&self, slug: &str) -> FeedResult<Vec<MatchPlayer>>;

    /// Current per-player fantasy points.
    async fn fetch_leaderboard(&self, slug: &str) -> FeedResult<Vec<LeaderboardPlayer>>;

    async fn fetch_scorecard(&self, slug: &str) -> FeedResult<MiniScorecard>;

    async fn fetch_upcoming_matches(&self) -> FeedResult<Vec<UpcomingMatch>>;
}

// ---------------------------------------------------------------------------
// FancrazeClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FancrazeClient {
    http: reqwest::Client,
    base_url: String,
}

impl FancrazeClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> FeedResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(FeedError::Client)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &FeedConfig) -> FeedResult<Self> {
        Self::new(
            &config.base_url,
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with `query`, check the status and decode the JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> FeedResult<T> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.get(&url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|source| FeedError::Network {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status { url, status });
        }

        let body = response.bytes().await.map_err(|source| FeedError::Network {
            url: url.clone(),
            source,
        })?;
        debug!(url = %url, bytes = body.len(), "feed response received");

        serde_json::from_slice(&body).map_err(|source| FeedError::Parse { url, source })
    }
}

#[async_trait]
impl MatchFeed for FancrazeClient {
    async fn fetch_match_players(&self, slug: &str) -> FeedResult<Vec<MatchPlayer>> {
        let resp: MatchPlayersResponse = self
            .get_json(MATCH_PLAYERS_PATH, &[("slug", slug)], &[])
            .await?;
        Ok(resp.into_players())
    }

    async fn fetch_leaderboard(&self, slug: &str) -> FeedResult<Vec<LeaderboardPlayer>> {
        let resp: LeaderboardResponse = self
            .get_json(LEADERBOARD_PATH, &[("slug", slug)], &[])
            .await?;
        Ok(resp.into_players())
    }

    async fn fetch_scorecard(&self, slug: &str) -> FeedResult<MiniScorecard> {
        let resp: ScorecardResponse = self
            .get_json(SCORECARD_PATH, &[("slug", slug)], &[])
            .await?;
        match resp.data {
            Some(card) if resp.success => Ok(card),
            _ => Err(FeedError::Unsuccessful {
                url: format!("{}{SCORECARD_PATH}", self.base_url),
            }),
        }
    }

    async fn fetch_upcoming_matches(&self) -> FeedResult<Vec<UpcomingMatch>> {
        let resp: UpcomingMatchesResponse = self
            .get_json(
                UPCOMING_PATH,
                &[
                    ("pageSize", "10"),
                    ("pageNumber", "1"),
                    ("tab", "UPCOMING"),
                    ("filter", "all"),
                    ("myGames", "0"),
                ],
                &[("source", "WEB")],
            )
            .await?;
        Ok(resp.into_matches())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
