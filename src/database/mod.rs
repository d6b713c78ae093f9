use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use serenity::prelude::TypeMapKey;

pub mod blacklist;
pub mod case;
pub mod chat;
pub mod vote;

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chats (
    guild_id BIGINT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    settings TEXT NOT NULL DEFAULT '{}',
    updated_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS cases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild_id BIGINT NOT NULL,
    channel_id BIGINT NOT NULL,
    message_id BIGINT NOT NULL,
    offender_id BIGINT NOT NULL,
    reporter_id BIGINT NOT NULL,
    status TEXT NOT NULL,
    opened_at TIMESTAMP NOT NULL,
    closes_at TIMESTAMP NOT NULL,
    ballot_channel_id BIGINT,
    ballot_message_id BIGINT,
    settings_snapshot TEXT NOT NULL,
    participant_target INTEGER NOT NULL,
    UNIQUE(guild_id, message_id)
);

CREATE TABLE IF NOT EXISTS votes (
    case_id INTEGER NOT NULL,
    voter_id BIGINT NOT NULL,
    decision TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL,
    PRIMARY KEY (case_id, voter_id)
);

CREATE TABLE IF NOT EXISTS blacklist (
    guild_id BIGINT NOT NULL,
    user_id BIGINT NOT NULL,
    reason TEXT,
    added_at TIMESTAMP NOT NULL,
    PRIMARY KEY (guild_id, user_id)
);
";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new() -> Database {
        Self::connect(&std::env::var("DATABASE_URL").expect("DATABASE_URL missing from the environment"))
    }

    pub fn connect(url: &str) -> Database {
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder()
            .build(manager)
            .expect("Failed to build the database pool");
        let db = Self { pool };
        db.ensure_schema().expect("Failed to create the database schema");
        db
    }

    /// One-connection pool over a throwaway in-memory database; with more
    /// connections every checkout would see its own empty schema.
    #[cfg(test)]
    pub fn connect_in_memory() -> Database {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("Failed to build the in-memory pool");
        let db = Self { pool };
        db.ensure_schema().expect("Failed to create the database schema");
        db
    }

    fn ensure_schema(&self) -> Result<(), anyhow::Error> {
        self.pool.get()?.batch_execute(SCHEMA)?;
        Ok(())
    }
}

impl TypeMapKey for Database {
    type Value = Arc<Database>;
}
