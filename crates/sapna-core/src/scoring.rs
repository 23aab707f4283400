// Fantasy scoring: roster-name resolution against the live feed, weighted
// team totals, and the ranking shown on the leaderboard.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{LeaderboardPlayer, MatchPlayer, Team};

// ---------------------------------------------------------------------------
// Player identity resolution
// ---------------------------------------------------------------------------

/// Display name -> leaderboard identifier, built from the match-players feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerIndex {
    ids: HashMap<String, String>,
}

impl PlayerIndex {
    /// Build the index from match players in feed order.
    ///
    /// Players without a name or without a usable identifier are skipped.
    /// When two players share a display name, the first one seen keeps the
    /// mapping and later ones are ignored.
    pub fn build<'a, I>(players: I) -> Self
    where
        I: IntoIterator<Item = &'a MatchPlayer>,
    {
        let mut ids = HashMap::new();
        for player in players {
            if player.name.is_empty() {
                continue;
            }
            let Some(id) = player.stable_id() else {
                continue;
            };
            ids.entry(player.name.clone())
                .or_insert_with(|| id.to_string());
        }
        Self { ids }
    }

    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Find the leaderboard row for a roster name.
///
/// A name with a mapped identifier is looked up by `pid` first, so a row
/// carrying the right id wins over a differently identified row that happens
/// to share the display name. Falls back to an exact name match.
pub fn resolve_player<'a>(
    index: &PlayerIndex,
    leaderboard: &'a [LeaderboardPlayer],
    name: &str,
) -> Option<&'a LeaderboardPlayer> {
    if let Some(id) = index.id_for(name) {
        if let Some(row) = leaderboard.iter().find(|p| p.pid == id) {
            return Some(row);
        }
    }
    leaderboard.iter().find(|p| p.name == name)
}

// ---------------------------------------------------------------------------
// Score computation
// ---------------------------------------------------------------------------

/// Parse a feed point value the way the feed's own clients do: the longest
/// leading decimal number counts (`"12.5pts"` is 12.5) and anything without
/// one, or that is not finite, counts as zero.
pub fn parse_points(raw: &str) -> f64 {
    let text = raw.trim_start();
    match text[..numeric_prefix_len(text)].parse::<f64>() {
        Ok(points) if points.is_finite() => points,
        _ => 0.0,
    }
}

/// Byte length of the `[+-]digits[.digits][e[+-]digits]` prefix of `text`.
fn numeric_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_end = digits_from(end);
    let mut mantissa_end = int_end;
    if bytes.get(int_end) == Some(&b'.') {
        mantissa_end = digits_from(int_end + 1);
    }
    // A lone sign or dot is not a number.
    if mantissa_end == end || (int_end == end && mantissa_end == int_end + 1) {
        return 0;
    }
    end = mantissa_end;

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    end
}

/// The weight a roster slot applies to its player's raw points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Multiplier {
    Captain,
    ViceCaptain,
    Regular,
}

impl Multiplier {
    /// Exact string comparison against the names recorded on the team.
    pub fn for_player(team: &Team, name: &str) -> Self {
        if name == team.captain {
            Multiplier::Captain
        } else if name == team.vice_captain {
            Multiplier::ViceCaptain
        } else {
            Multiplier::Regular
        }
    }

    pub fn factor(self) -> f64 {
        match self {
            Multiplier::Captain => 2.0,
            Multiplier::ViceCaptain => 1.5,
            Multiplier::Regular => 1.0,
        }
    }
}

/// One roster player's contribution to a team total.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerScore {
    pub name: String,
    pub multiplier: Multiplier,
    pub raw_points: f64,
    pub points: f64,
    pub resolved: bool,
}

/// Per-player contributions in roster order. Unresolved players score zero.
pub fn score_breakdown(
    team: &Team,
    index: &PlayerIndex,
    leaderboard: &[LeaderboardPlayer],
) -> Vec<PlayerScore> {
    team.players
        .iter()
        .map(|name| {
            let multiplier = Multiplier::for_player(team, name);
            let row = if leaderboard.is_empty() {
                None
            } else {
                resolve_player(index, leaderboard, name)
            };
            let raw_points = row.map(|p| parse_points(&p.raw_points)).unwrap_or(0.0);
            PlayerScore {
                name: name.clone(),
                multiplier,
                raw_points,
                points: raw_points * multiplier.factor(),
                resolved: row.is_some(),
            }
        })
        .collect()
}

/// Weighted total for one team: captain x2, vice-captain x1.5, others x1.
/// An empty leaderboard scores every team at exactly zero.
pub fn score_team(team: &Team, index: &PlayerIndex, leaderboard: &[LeaderboardPlayer]) -> f64 {
    total_points(&score_breakdown(team, index, leaderboard))
}

/// Sum of contributions, starting from +0.0 so an all-zero team never
/// totals -0.0 and sorts below a later team at zero.
fn total_points(breakdown: &[PlayerScore]) -> f64 {
    breakdown.iter().fold(0.0, |acc, p| acc + p.points)
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTeam {
    /// 1-based position in the ranking.
    pub rank: usize,
    #[serde(flatten)]
    pub team: Team,
    pub points: f64,
    pub breakdown: Vec<PlayerScore>,
}

/// Score every team and order them by total, highest first.
///
/// The sort is stable: teams with equal totals keep their insertion order.
pub fn rank_teams(
    teams: &[Team],
    index: &PlayerIndex,
    leaderboard: &[LeaderboardPlayer],
) -> Vec<RankedTeam> {
    let mut ranked: Vec<RankedTeam> = teams
        .iter()
        .map(|team| {
            let breakdown = score_breakdown(team, index, leaderboard);
            RankedTeam {
                rank: 0,
                team: team.clone(),
                points: total_points(&breakdown),
                breakdown,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.points.total_cmp(&a.points));
    for (i, entry) in ranked.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    ranked
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
