//! Feature builder: training table loading, batch upload parsing, and the
//! fixed-layout encoding of player rows and match rosters into feature rows.
//!
//! Feature row layout (width [`FEATURE_WIDTH`]):
//! - radiant side: the nine [`STAT_COLUMNS`] followed by a hero win rate
//! - dire side: the same ten values
//! - match duration

pub mod encoder;
pub mod table;

use thiserror::Error;

pub use encoder::{FeatureEncoder, RosterEntry, FEATURE_WIDTH, SIDE_WIDTH, TEAM_SIZE};
pub use table::{parse_batch, Dataset, MatchRecord, PlayerRow};

/// Per-player numeric columns, in feature order.
pub const STAT_COLUMNS: [&str; 9] = [
    "kills",
    "deaths",
    "assists",
    "gold_per_min",
    "xp_per_min",
    "hero_damage",
    "hero_healing",
    "net_worth",
    "level",
];

/// Columns a batch upload must carry.
pub const REQUIRED_BATCH_COLUMNS: [&str; 12] = [
    "kills",
    "deaths",
    "assists",
    "gold_per_min",
    "xp_per_min",
    "hero_damage",
    "hero_healing",
    "net_worth",
    "level",
    "duration",
    "hero_name",
    "isRadiant",
];

/// Columns the training table carries on top of the batch columns.
pub const TRAINING_ONLY_COLUMNS: [&str; 3] = ["match_id", "account_id", "radiant_win"];

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("row {row}: {message}")]
    Row { row: usize, message: String },
    #[error("upload contains no rows")]
    Empty,
    #[error("invalid roster: {0}")]
    Roster(String),
    #[error("cannot fit feature encoder: {0}")]
    Fit(String),
}

pub type Result<T> = std::result::Result<T, FeatureError>;
