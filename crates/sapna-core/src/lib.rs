// Core of the fantasy rooms service: the room/team model, scoring and
// ranking, the team deadline guard, configuration, and the SQLite store.

pub mod config;
pub mod db;
pub mod guard;
pub mod model;
pub mod scoring;
