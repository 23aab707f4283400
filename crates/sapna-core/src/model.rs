// Room and team records plus the match-data shapes they are scored against.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Number of players every fantasy team must field.
pub const TEAM_SIZE: usize = 11;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TeamError {
    #[error("team name must not be empty")]
    EmptyName,

    #[error("team must have exactly {expected} players, got {actual}")]
    WrongSize { expected: usize, actual: usize },

    #[error("player names must not be empty")]
    EmptyPlayerName,

    #[error("player `{0}` appears more than once")]
    DuplicatePlayer(String),

    #[error("captain `{0}` is not in the team")]
    CaptainNotInTeam(String),

    #[error("vice-captain `{0}` is not in the team")]
    ViceCaptainNotInTeam(String),

    #[error("`{0}` cannot be both captain and vice-captain")]
    SameCaptainAndViceCaptain(String),

    #[error("team selection closed at {deadline}")]
    DeadlinePassed { deadline: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoomError {
    #[error("room name must not be empty")]
    EmptyName,

    #[error("match slug must not be empty")]
    EmptySlug,
}

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

/// A fantasy entry: eleven player names with a captain and vice-captain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub name: String,
    pub captain: String,
    pub vice_captain: String,
    pub players: Vec<String>,
}

impl Team {
    /// Check the roster rules: a name, exactly [`TEAM_SIZE`] distinct
    /// non-empty players, and a captain and vice-captain who are two
    /// different members of the roster.
    pub fn validate(&self) -> Result<(), TeamError> {
        if self.name.trim().is_empty() {
            return Err(TeamError::EmptyName);
        }

        if self.players.len() != TEAM_SIZE {
            return Err(TeamError::WrongSize {
                expected: TEAM_SIZE,
                actual: self.players.len(),
            });
        }

        let mut seen = HashSet::with_capacity(TEAM_SIZE);
        for player in &self.players {
            if player.trim().is_empty() {
                return Err(TeamError::EmptyPlayerName);
            }
            if !seen.insert(player.as_str()) {
                return Err(TeamError::DuplicatePlayer(player.clone()));
            }
        }

        if !seen.contains(self.captain.as_str()) {
            return Err(TeamError::CaptainNotInTeam(self.captain.clone()));
        }
        if !seen.contains(self.vice_captain.as_str()) {
            return Err(TeamError::ViceCaptainNotInTeam(self.vice_captain.clone()));
        }
        if self.captain == self.vice_captain {
            return Err(TeamError::SameCaptainAndViceCaptain(self.captain.clone()));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// One match's fantasy competition. `teams` keeps insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub teams: Vec<Team>,
    pub created_at: DateTime<Utc>,
}

/// Where a room sits relative to its match start and team deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomPhase {
    /// Match not started, teams still accepted.
    Open,
    /// Match under way, deadline not yet reached.
    Live,
    /// Deadline passed; the team list is frozen.
    Closed,
}

impl Room {
    /// Teams may be added strictly before `end_time`.
    pub fn accepts_teams(&self, now: DateTime<Utc>) -> bool {
        now < self.end_time
    }

    pub fn phase(&self, now: DateTime<Utc>) -> RoomPhase {
        if !self.accepts_teams(now) {
            RoomPhase::Closed
        } else if self.start_time <= now {
            RoomPhase::Live
        } else {
            RoomPhase::Open
        }
    }

    pub fn team(&self, name: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.name == name)
    }
}

/// Payload for creating a room. Rooms always start without teams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub name: String,
    pub slug: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl NewRoom {
    pub fn validate(&self) -> Result<(), RoomError> {
        if self.name.trim().is_empty() {
            return Err(RoomError::EmptyName);
        }
        if self.slug.trim().is_empty() {
            return Err(RoomError::EmptySlug);
        }
        Ok(())
    }

    /// Prefill a room from an upcoming match listing: the slug is the match's
    /// first mode and both times default to the match start.
    ///
    /// Returns `None` when the listing carries no mode to use as a slug.
    pub fn from_match(name: impl Into<String>, upcoming: &UpcomingMatch) -> Option<Self> {
        let slug = upcoming.modes.first()?.clone();
        Some(Self {
            name: name.into(),
            slug,
            start_time: upcoming.start_date,
            end_time: upcoming.start_date,
        })
    }
}

/// Full replacement of a room's editable fields (metadata plus team list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    pub name: String,
    pub slug: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub teams: Vec<Team>,
}

impl RoomUpdate {
    pub fn metadata(&self) -> NewRoom {
        NewRoom {
            name: self.name.clone(),
            slug: self.slug.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Match data (third-party shapes)
// ---------------------------------------------------------------------------

/// A real player in the match context, as listed by the match-players feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPlayer {
    #[serde(default, deserialize_with = "de_or_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub player_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub entity_player_id: Option<String>,
    #[serde(default, deserialize_with = "de_or_default")]
    pub team_name: String,
    #[serde(default, deserialize_with = "de_or_default")]
    pub playing_role: String,
}

impl MatchPlayer {
    /// The identifier the leaderboard uses for this player: the entity id when
    /// present, otherwise the plain player id. Empty ids count as absent.
    pub fn stable_id(&self) -> Option<&str> {
        self.entity_player_id
            .as_deref()
            .or(self.player_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// One row of the live fantasy-points feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPlayer {
    #[serde(default, deserialize_with = "de_id")]
    pub pid: String,
    #[serde(default, deserialize_with = "de_or_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de_id")]
    pub raw_points: String,
    #[serde(default, deserialize_with = "de_or_default")]
    pub team_name: String,
    #[serde(default, deserialize_with = "de_or_default")]
    pub role: String,
    #[serde(default, deserialize_with = "de_or_default")]
    pub playing_eleven: bool,
}

/// A match offered for new rooms by the upcoming-matches feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingMatch {
    #[serde(deserialize_with = "de_id")]
    pub match_id: String,
    #[serde(default, deserialize_with = "de_or_default")]
    pub modes: Vec<String>,
    pub start_date: DateTime<Utc>,
    #[serde(default, deserialize_with = "de_or_default")]
    pub title_alias: String,
    #[serde(default, deserialize_with = "de_or_default")]
    pub format_str: String,
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// The feeds encode identifiers and point values as either JSON strings or
/// numbers; both are normalised to strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
        }
    }
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?
        .map(String::from)
        .unwrap_or_default())
}

/// Columns the scorer never reads may be `null` in the feed; treat that the
/// same as a missing key.
fn de_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn roster() -> Vec<String> {
        (1..=TEAM_SIZE).map(|i| format!("Player {i}")).collect()
    }

    fn valid_team() -> Team {
        Team {
            name: "Om Sarda".into(),
            captain: "Player 1".into(),
            vice_captain: "Player 2".into(),
            players: roster(),
        }
    }

    fn room_at(start_hour: u32, end_hour: u32) -> Room {
        Room {
            id: "r1".into(),
            name: "Finals".into(),
            slug: "nz-vs-ban".into(),
            start_time: Utc.with_ymd_and_hms(2025, 2, 24, start_hour, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 2, 24, end_hour, 0, 0).unwrap(),
            teams: vec![],
            created_at: Utc.with_ymd_and_hms(2025, 2, 23, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn valid_team_passes() {
        assert_eq!(valid_team().validate(), Ok(()));
    }

    #[test]
    fn blank_team_name_rejected() {
        let team = Team {
            name: "   ".into(),
            ..valid_team()
        };
        assert_eq!(team.validate(), Err(TeamError::EmptyName));
    }

    #[test]
    fn ten_players_rejected() {
        let mut team = valid_team();
        team.players.pop();
        assert_eq!(
            team.validate(),
            Err(TeamError::WrongSize {
                expected: 11,
                actual: 10
            })
        );
    }

    #[test]
    fn duplicate_player_rejected() {
        let mut team = valid_team();
        team.players[10] = "Player 3".into();
        assert_eq!(
            team.validate(),
            Err(TeamError::DuplicatePlayer("Player 3".into()))
        );
    }

    #[test]
    fn captain_must_be_in_roster() {
        let team = Team {
            captain: "Somebody Else".into(),
            ..valid_team()
        };
        assert_eq!(
            team.validate(),
            Err(TeamError::CaptainNotInTeam("Somebody Else".into()))
        );
    }

    #[test]
    fn vice_captain_must_be_in_roster() {
        let team = Team {
            vice_captain: "".into(),
            ..valid_team()
        };
        assert_eq!(
            team.validate(),
            Err(TeamError::ViceCaptainNotInTeam("".into()))
        );
    }

    #[test]
    fn captain_and_vice_captain_must_differ() {
        let team = Team {
            vice_captain: "Player 1".into(),
            ..valid_team()
        };
        assert_eq!(
            team.validate(),
            Err(TeamError::SameCaptainAndViceCaptain("Player 1".into()))
        );
    }

    #[test]
    fn phase_follows_start_and_deadline() {
        let room = room_at(10, 14);
        let at = |h| Utc.with_ymd_and_hms(2025, 2, 24, h, 0, 0).unwrap();

        assert_eq!(room.phase(at(9)), RoomPhase::Open);
        assert_eq!(room.phase(at(10)), RoomPhase::Live);
        assert_eq!(room.phase(at(13)), RoomPhase::Live);
        // The deadline instant itself is already closed.
        assert_eq!(room.phase(at(14)), RoomPhase::Closed);
        assert!(!room.accepts_teams(at(14)));
        assert!(room.accepts_teams(at(13)));
    }

    #[test]
    fn room_json_uses_camel_case() {
        let mut room = room_at(10, 14);
        room.teams.push(valid_team());
        let json = serde_json::to_value(&room).unwrap();

        assert!(json.get("startTime").is_some());
        assert!(json.get("endTime").is_some());
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["teams"][0]["viceCaptain"], "Player 2");
    }

    #[test]
    fn new_room_requires_name_and_slug() {
        let room = room_at(10, 14);
        let mut new_room = NewRoom {
            name: "".into(),
            slug: room.slug.clone(),
            start_time: room.start_time,
            end_time: room.end_time,
        };
        assert_eq!(new_room.validate(), Err(RoomError::EmptyName));

        new_room.name = "Finals".into();
        new_room.slug = " ".into();
        assert_eq!(new_room.validate(), Err(RoomError::EmptySlug));
    }

    #[test]
    fn new_room_from_upcoming_match_uses_first_mode() {
        let upcoming: UpcomingMatch = serde_json::from_value(serde_json::json!({
            "match_id": 8841,
            "modes": ["nz-vs-ban-ct-2025", "nz-vs-ban-alt"],
            "start_date": "2025-02-24T09:00:00Z",
            "title_alias": "NZ vs BAN",
            "format_str": "ODI"
        }))
        .unwrap();

        let room = NewRoom::from_match("Office league", &upcoming).unwrap();
        assert_eq!(upcoming.match_id, "8841");
        assert_eq!(room.slug, "nz-vs-ban-ct-2025");
        assert_eq!(room.start_time, upcoming.start_date);
        assert_eq!(room.end_time, upcoming.start_date);
    }

    #[test]
    fn new_room_from_match_without_modes_is_none() {
        let upcoming = UpcomingMatch {
            match_id: "1".into(),
            modes: vec![],
            start_date: Utc.with_ymd_and_hms(2025, 2, 24, 9, 0, 0).unwrap(),
            title_alias: String::new(),
            format_str: String::new(),
        };
        assert!(NewRoom::from_match("x", &upcoming).is_none());
    }

    #[test]
    fn feed_ids_accept_numbers_and_strings() {
        let player: MatchPlayer = serde_json::from_value(serde_json::json!({
            "name": "Kane Williamson",
            "playerId": 44,
            "entityPlayerId": "9001",
            "teamName": "NZ",
            "playingRole": "BAT",
            "credits": 9.5
        }))
        .unwrap();
        assert_eq!(player.player_id.as_deref(), Some("44"));
        assert_eq!(player.stable_id(), Some("9001"));

        let row: LeaderboardPlayer = serde_json::from_value(serde_json::json!({
            "pid": 9001,
            "name": "Kane Williamson",
            "rawPoints": 57.5
        }))
        .unwrap();
        assert_eq!(row.pid, "9001");
        assert_eq!(row.raw_points, "57.5");
    }

    #[test]
    fn null_feed_columns_decode_as_defaults() {
        let rows: Vec<LeaderboardPlayer> = serde_json::from_str(
            r#"[{"pid":"1","name":"A","rawPoints":"10","teamName":null,"role":null,"playingEleven":null},
                {"pid":"2","name":null,"rawPoints":null}]"#,
        )
        .unwrap();
        assert_eq!(rows[0].team_name, "");
        assert!(!rows[0].playing_eleven);
        assert_eq!(rows[1].name, "");
        assert_eq!(rows[1].raw_points, "");

        let player: MatchPlayer = serde_json::from_str(
            r#"{"name":"Kane Williamson","playerId":44,"teamName":null,"playingRole":null}"#,
        )
        .unwrap();
        assert_eq!(player.stable_id(), Some("44"));
        assert_eq!(player.playing_role, "");
    }

    #[test]
    fn stable_id_falls_back_to_player_id_and_skips_empty() {
        let mut player = MatchPlayer {
            name: "Tom Latham".into(),
            player_id: Some("12".into()),
            entity_player_id: None,
            ..Default::default()
        };
        assert_eq!(player.stable_id(), Some("12"));

        player.entity_player_id = Some(String::new());
        assert_eq!(player.stable_id(), None);

        player.entity_player_id = None;
        player.player_id = None;
        assert_eq!(player.stable_id(), None);
    }
}
