use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TEERANK_UPDATE_DELAY={0} is not a number")]
    InvalidUpdateDelay(String),
    #[error("TEERANK_UPDATE_DELAY={0} is out of range (must be 1..=20)")]
    UpdateDelayOutOfRange(u32),
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },
}
