use diesel::prelude::*;

use super::Database;
use crate::models::NewBlacklistEntry;

impl Database {
    /// Add or overwrite a blacklist entry for the (guild, user) pair.
    pub async fn blacklist_add(
        &self,
        guild: i64,
        user: i64,
        entry_reason: Option<&str>,
    ) -> Result<usize, anyhow::Error> {
        let row = NewBlacklistEntry {
            guild_id: guild,
            user_id: user,
            reason: entry_reason.map(|r| r.to_string()),
            added_at: chrono::Utc::now().naive_utc(),
        };
        Ok(diesel::replace_into(crate::schema::blacklist::table)
            .values(&row)
            .execute(&self.pool.get()?)?)
    }

    pub async fn blacklist_remove(&self, guild: i64, user: i64) -> Result<usize, anyhow::Error> {
        use crate::schema::blacklist::dsl::*;
        Ok(diesel::delete(crate::schema::blacklist::table)
            .filter(guild_id.eq(guild).and(user_id.eq(user)))
            .execute(&self.pool.get()?)?)
    }

    pub async fn blacklist_contains(&self, guild: i64, user: i64) -> Result<bool, anyhow::Error> {
        use crate::schema::blacklist::dsl::*;
        Ok(blacklist
            .filter(guild_id.eq(guild).and(user_id.eq(user)))
            .select(user_id)
            .first::<i64>(&self.pool.get()?)
            .optional()?
            .is_some())
    }
}
