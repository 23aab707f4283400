// Deadline enforcement for team submissions.

use chrono::{DateTime, Utc};

use crate::model::{Room, TeamError};

/// Refuse team changes once the room's deadline has been reached.
///
/// The store calls this inside the same transaction that writes the team
/// list, so callers cannot bypass it.
pub fn ensure_accepting_teams(room: &Room, now: DateTime<Utc>) -> Result<(), TeamError> {
    if room.accepts_teams(now) {
        Ok(())
    } else {
        Err(TeamError::DeadlinePassed {
            deadline: room.end_time,
        })
    }
}
