use diesel::prelude::*;
use serde_json::{Map, Value};

use super::Database;
use crate::models::ChatRow;

impl Database {
    /// Register or refresh a chat, keeping any stored settings overrides.
    pub async fn upsert_chat(&self, guild: i64, chat_title: &str) -> Result<usize, anyhow::Error> {
        let conn = self.pool.get()?;
        let existing = {
            use crate::schema::chats::dsl::*;
            chats
                .filter(guild_id.eq(guild))
                .select(settings)
                .first::<String>(&conn)
                .optional()?
        };
        let row = ChatRow {
            guild_id: guild,
            title: chat_title.to_string(),
            settings: existing.unwrap_or_else(|| "{}".to_string()),
            updated_at: chrono::Utc::now().naive_utc(),
        };
        Ok(diesel::replace_into(crate::schema::chats::table)
            .values(&row)
            .execute(&conn)?)
    }

    pub async fn get_chat_settings(
        &self,
        guild: i64,
    ) -> Result<Option<Map<String, Value>>, anyhow::Error> {
        use crate::schema::chats::dsl::*;
        let stored = chats
            .filter(guild_id.eq(guild))
            .select(settings)
            .first::<String>(&self.pool.get()?)
            .optional()?;
        match stored {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_chat_settings(
        &self,
        guild: i64,
        overrides: &Map<String, Value>,
    ) -> Result<usize, anyhow::Error> {
        let conn = self.pool.get()?;
        let existing = {
            use crate::schema::chats::dsl::*;
            chats
                .filter(guild_id.eq(guild))
                .select(title)
                .first::<String>(&conn)
                .optional()?
        };
        let row = ChatRow {
            guild_id: guild,
            title: existing.unwrap_or_default(),
            settings: serde_json::to_string(overrides)?,
            updated_at: chrono::Utc::now().naive_utc(),
        };
        Ok(diesel::replace_into(crate::schema::chats::table)
            .values(&row)
            .execute(&conn)?)
    }

    pub async fn get_chat_title(&self, guild: i64) -> Result<Option<String>, anyhow::Error> {
        use crate::schema::chats::dsl::*;
        Ok(chats
            .filter(guild_id.eq(guild))
            .select(title)
            .first::<String>(&self.pool.get()?)
            .optional()?)
    }
}
