use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported manifest schema version {found} (expected {expected})")]
    SchemaVersion { found: i32, expected: i32 },
}

pub type Result<T> = std::result::Result<T, Error>;
