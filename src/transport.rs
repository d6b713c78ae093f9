use std::collections::HashSet;

use chrono::NaiveDateTime;
use serenity::async_trait;

/// Location of a posted ballot message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallotRef {
    pub channel_id: i64,
    pub message_id: i64,
}

/// Everything the case engine needs from the chat platform. The live
/// implementation wraps the Discord HTTP client; tests substitute a mock so
/// lifecycle logic runs without a gateway connection.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post the ballot as a reply to the reported message and return where it
    /// landed.
    async fn post_ballot(
        &self,
        channel_id: i64,
        reply_to: i64,
        case_id: i32,
        body: &str,
        allow_retract: bool,
    ) -> Result<BallotRef, anyhow::Error>;

    /// Rewrite an open ballot's text, keeping the vote buttons.
    async fn refresh_ballot(
        &self,
        ballot: BallotRef,
        case_id: i32,
        body: &str,
        allow_retract: bool,
    ) -> Result<(), anyhow::Error>;

    /// Replace the ballot with its final text and strip the vote buttons.
    async fn close_ballot(&self, ballot: BallotRef, body: &str) -> Result<(), anyhow::Error>;

    async fn delete_message(&self, channel_id: i64, message_id: i64) -> Result<(), anyhow::Error>;

    async fn member_count(&self, guild_id: i64) -> Result<u64, anyhow::Error>;

    async fn admin_ids(&self, guild_id: i64) -> Result<HashSet<i64>, anyhow::Error>;

    async fn ban_member(&self, guild_id: i64, user_id: i64, reason: &str)
        -> Result<(), anyhow::Error>;

    async fn unban_member(&self, guild_id: i64, user_id: i64) -> Result<(), anyhow::Error>;

    /// Block the member from sending messages until the given instant (UTC).
    async fn mute_member(
        &self,
        guild_id: i64,
        user_id: i64,
        until: NaiveDateTime,
    ) -> Result<(), anyhow::Error>;
}
