// Response envelopes of the third-party match data API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sapna_core::model::{LeaderboardPlayer, MatchPlayer, UpcomingMatch};

/// `getMatchPlayers`: `{ "data": { "<playerId>": MatchPlayer, ... } }`.
#[derive(Debug, Deserialize)]
pub struct MatchPlayersResponse {
    #[serde(default)]
    pub data: Option<BTreeMap<String, MatchPlayer>>,
}

impl MatchPlayersResponse {
    /// Players in ascending numeric key order; keys that are not numbers
    /// follow, sorted as text. This fixes which entry is "first" when two
    /// players share a display name.
    pub fn into_players(self) -> Vec<MatchPlayer> {
        let mut entries: Vec<(String, MatchPlayer)> =
            self.data.unwrap_or_default().into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| player_key_order(a).cmp(&player_key_order(b)));
        entries.into_iter().map(|(_, player)| player).collect()
    }
}

fn player_key_order(key: &str) -> (u8, u64, &str) {
    match key.parse::<u64>() {
        Ok(n) => (0, n, key),
        Err(_) => (1, 0, key),
    }
}

/// `getFantasyPointLeaderboard`: `{ "data": { "playerList": [...] } }`.
#[derive(Debug, Deserialize)]
pub struct LeaderboardResponse {
    #[serde(default)]
    pub data: Option<LeaderboardData>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardData {
    #[serde(rename = "playerList", default)]
    pub player_list: Option<Vec<LeaderboardPlayer>>,
}

impl LeaderboardResponse {
    /// A missing `data` or `playerList` is an empty leaderboard, not an error.
    pub fn into_players(self) -> Vec<LeaderboardPlayer> {
        self.data
            .and_then(|d| d.player_list)
            .unwrap_or_default()
    }
}

/// `getMiniScoreCardBySlug`: `{ "success": bool, "data": MiniScorecard }`.
#[derive(Debug, Deserialize)]
pub struct ScorecardResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<MiniScorecard>,
}

/// Match header shown above the rankings. Not used for scoring.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MiniScorecard {
    #[serde(default)]
    pub tournament_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub team_1: ScorecardTeam,
    #[serde(default)]
    pub team_2: ScorecardTeam,
    #[serde(default)]
    pub toss_result: Option<String>,
    #[serde(default)]
    pub status_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScorecardTeam {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub scores: Option<String>,
    #[serde(default)]
    pub overs: Option<String>,
}

/// `getChallengeMatchesBff`: `{ "data": { "matches": [...] } }`.
#[derive(Debug, Deserialize)]
pub struct UpcomingMatchesResponse {
    #[serde(default)]
    pub data: Option<UpcomingMatchesData>,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingMatchesData {
    #[serde(default)]
    pub matches: Vec<UpcomingMatch>,
}

impl UpcomingMatchesResponse {
    pub fn into_matches(self) -> Vec<UpcomingMatch> {
        self.data.map(|d| d.matches).unwrap_or_default()
    }
}
