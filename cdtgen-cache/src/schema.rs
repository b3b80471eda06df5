//! SQLite schema definitions

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create the database schema
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    version INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    description TEXT
);

-- Last emission per tuple
CREATE TABLE IF NOT EXISTS generation_manifest (
    package TEXT NOT NULL,
    distro TEXT NOT NULL,
    architecture TEXT NOT NULL,

    fingerprint TEXT NOT NULL,
    source_url TEXT NOT NULL,
    version TEXT NOT NULL,
    bump INTEGER NOT NULL DEFAULT 0 CHECK(bump >= 0),

    recorded_at TEXT NOT NULL,

    PRIMARY KEY (package, distro, architecture)
);

CREATE INDEX IF NOT EXISTS idx_manifest_distro ON generation_manifest(distro, architecture);
"#;
