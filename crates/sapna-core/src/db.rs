// SQLite persistence layer for rooms and their teams.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

use crate::guard::ensure_accepting_teams;
use crate::model::{NewRoom, Room, RoomError, RoomUpdate, Team, TeamError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("room not found: {id}")]
    RoomNotFound { id: String },

    #[error("invalid room: {0}")]
    InvalidRoom(#[from] RoomError),

    #[error("invalid team: {0}")]
    InvalidTeam(#[from] TeamError),

    #[error("team name `{0}` is already taken in this room")]
    DuplicateTeamName(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_deadline_passed(&self) -> bool {
        matches!(self, StoreError::InvalidTeam(TeamError::DeadlinePassed { .. }))
    }
}

/// SQLite-backed room store. Every mutation is a single transaction, so a
/// room and its team list are always replaced or appended atomically.
pub struct RoomStore {
    conn: Mutex<Connection>,
}

impl RoomStore {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rooms (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                slug       TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time   TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS teams (
                room_id      TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                position     INTEGER NOT NULL,
                name         TEXT NOT NULL,
                captain      TEXT NOT NULL,
                vice_captain TEXT NOT NULL,
                players      TEXT NOT NULL,
                PRIMARY KEY (room_id, position)
            );

            CREATE INDEX IF NOT EXISTS idx_rooms_created_at ON rooms(created_at);
            ",
        )
        .context("failed to create database schema")?;

        info!("Room store ready at {path}");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Create an empty room with a fresh id.
    pub fn create_room(&self, new_room: &NewRoom) -> Result<Room, StoreError> {
        new_room.validate()?;

        let room = Room {
            id: uuid::Uuid::new_v4().to_string(),
            name: new_room.name.trim().to_string(),
            slug: new_room.slug.trim().to_string(),
            start_time: new_room.start_time,
            end_time: new_room.end_time,
            teams: vec![],
            created_at: Utc::now(),
        };

        let conn = self.conn();
        conn.execute(
            "INSERT INTO rooms (id, name, slug, start_time, end_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                room.id,
                room.name,
                room.slug,
                encode_time(room.start_time),
                encode_time(room.end_time),
                encode_time(room.created_at),
            ],
        )
        .context("failed to insert room")?;

        info!(room_id = %room.id, slug = %room.slug, "Created room {}", room.name);
        Ok(room)
    }

    /// Load a room with its teams in insertion order.
    pub fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        let conn = self.conn();
        Ok(load_room(&conn, id)?)
    }

    /// All rooms, newest first.
    pub fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let conn = self.conn();
        let ids: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT id FROM rooms ORDER BY created_at DESC, rowid DESC")
                .context("failed to prepare list_rooms query")?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .context("failed to query rooms")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map room ids")?;
            rows
        };

        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(room) = load_room(&conn, &id)? {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    /// Replace a room's metadata and team list.
    ///
    /// Once the stored deadline has passed only the name and slug may change.
    /// Touching the team list or either time is refused, so a closed room
    /// cannot be reopened by moving its deadline.
    pub fn update_room(
        &self,
        id: &str,
        update: &RoomUpdate,
        now: DateTime<Utc>,
    ) -> Result<Room, StoreError> {
        update.metadata().validate()?;
        for team in &update.teams {
            team.validate()?;
        }
        if let Some(name) = first_duplicate_name(&update.teams) {
            return Err(StoreError::DuplicateTeamName(name.to_string()));
        }

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let existing = load_room(&tx, id)?.ok_or_else(|| StoreError::RoomNotFound { id: id.to_string() })?;
        let times_changed = encode_time(existing.start_time) != encode_time(update.start_time)
            || encode_time(existing.end_time) != encode_time(update.end_time);
        if existing.teams != update.teams || times_changed {
            ensure_accepting_teams(&existing, now)?;
        }

        tx.execute(
            "UPDATE rooms SET name = ?2, slug = ?3, start_time = ?4, end_time = ?5 WHERE id = ?1",
            params![
                id,
                update.name.trim(),
                update.slug.trim(),
                encode_time(update.start_time),
                encode_time(update.end_time),
            ],
        )
        .context("failed to update room")?;

        tx.execute("DELETE FROM teams WHERE room_id = ?1", params![id])
            .context("failed to clear teams")?;
        for (position, team) in update.teams.iter().enumerate() {
            insert_team(&tx, id, position as i64, team)?;
        }

        let room = load_room(&tx, id)?.ok_or_else(|| StoreError::RoomNotFound { id: id.to_string() })?;
        tx.commit().context("failed to commit update_room")?;

        debug!(room_id = %id, teams = room.teams.len(), "Updated room");
        Ok(room)
    }

    /// Append a team to a room, enforcing roster rules, unique team names and
    /// the submission deadline.
    pub fn add_team(&self, id: &str, team: &Team, now: DateTime<Utc>) -> Result<Room, StoreError> {
        team.validate()?;

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let existing = load_room(&tx, id)?.ok_or_else(|| StoreError::RoomNotFound { id: id.to_string() })?;
        ensure_accepting_teams(&existing, now)?;
        if existing.team(&team.name).is_some() {
            return Err(StoreError::DuplicateTeamName(team.name.clone()));
        }

        let next_position: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM teams WHERE room_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("failed to compute team position")?;
        insert_team(&tx, id, next_position, team)?;

        let room = load_room(&tx, id)?.ok_or_else(|| StoreError::RoomNotFound { id: id.to_string() })?;
        tx.commit().context("failed to commit add_team")?;

        info!(room_id = %id, team = %team.name, "Team added ({} total)", room.teams.len());
        Ok(room)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid stored timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

fn first_duplicate_name(teams: &[Team]) -> Option<&str> {
    let mut seen = HashSet::new();
    teams
        .iter()
        .map(|t| t.name.as_str())
        .find(|name| !seen.insert(*name))
}

fn insert_team(conn: &Connection, room_id: &str, position: i64, team: &Team) -> Result<()> {
    let players_json =
        serde_json::to_string(&team.players).context("failed to serialize players")?;
    conn.execute(
        "INSERT INTO teams (room_id, position, name, captain, vice_captain, players)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            room_id,
            position,
            team.name,
            team.captain,
            team.vice_captain,
            players_json,
        ],
    )
    .context("failed to insert team")?;
    Ok(())
}

fn load_room(conn: &Connection, id: &str) -> Result<Option<Room>> {
    let row = conn
        .query_row(
            "SELECT id, name, slug, start_time, end_time, created_at FROM rooms WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()
        .context("failed to query room")?;

    let Some((id, name, slug, start_time, end_time, created_at)) = row else {
        return Ok(None);
    };

    let teams = load_teams(conn, &id)?;
    Ok(Some(Room {
        start_time: decode_time(&start_time)?,
        end_time: decode_time(&end_time)?,
        created_at: decode_time(&created_at)?,
        id,
        name,
        slug,
        teams,
    }))
}

fn load_teams(conn: &Connection, room_id: &str) -> Result<Vec<Team>> {
    let mut stmt = conn
        .prepare(
            "SELECT name, captain, vice_captain, players
             FROM teams WHERE room_id = ?1 ORDER BY position",
        )
        .context("failed to prepare load_teams query")?;

    let rows = stmt
        .query_map(params![room_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .context("failed to query teams")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map team rows")?;

    rows.into_iter()
        .map(|(name, captain, vice_captain, players_json)| {
            let players: Vec<String> = serde_json::from_str(&players_json)
                .with_context(|| format!("corrupt player list for team {name}"))?;
            Ok(Team {
                name,
                captain,
                vice_captain,
                players,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
