use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDateTime, Utc};
use serenity::async_trait;
use serenity::builder::CreateComponents;
use serenity::http::Http;
use serenity::model::application::component::ButtonStyle;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::model::Timestamp;

use crate::transport::{BallotRef, ChatTransport};

/// `ChatTransport` over the Discord HTTP client. Pure adapter: every call
/// maps to one or two REST requests and reports failures upward untouched.
pub struct DiscordTransport {
    http: Arc<Http>,
}

impl DiscordTransport {
    pub fn new(http: Arc<Http>) -> DiscordTransport {
        DiscordTransport { http }
    }
}

fn vote_buttons(components: &mut CreateComponents, case_id: i32, allow_retract: bool) {
    components.create_action_row(|row| {
        row.create_button(|b| {
            b.style(ButtonStyle::Danger);
            b.label("Spam");
            b.custom_id(format!("jury_spam_{}", case_id))
        });
        row.create_button(|b| {
            b.style(ButtonStyle::Success);
            b.label("Not spam");
            b.custom_id(format!("jury_not_{}", case_id))
        });
        if allow_retract {
            row.create_button(|b| {
                b.style(ButtonStyle::Secondary);
                b.label("Retract vote");
                b.custom_id(format!("jury_retract_{}", case_id))
            });
        }
        row
    });
}

#[async_trait]
impl ChatTransport for DiscordTransport {
    async fn post_ballot(
        &self,
        channel_id: i64,
        reply_to: i64,
        case_id: i32,
        body: &str,
        allow_retract: bool,
    ) -> Result<BallotRef, anyhow::Error> {
        let channel = ChannelId(channel_id as u64);
        let message = channel
            .send_message(&self.http, |m| {
                m.reference_message((channel, MessageId(reply_to as u64)));
                m.allowed_mentions(|am| am.empty_parse());
                m.content(body);
                m.components(|c| {
                    vote_buttons(c, case_id, allow_retract);
                    c
                })
            })
            .await?;
        Ok(BallotRef {
            channel_id: message.channel_id.0 as i64,
            message_id: message.id.0 as i64,
        })
    }

    async fn refresh_ballot(
        &self,
        ballot: BallotRef,
        case_id: i32,
        body: &str,
        allow_retract: bool,
    ) -> Result<(), anyhow::Error> {
        ChannelId(ballot.channel_id as u64)
            .edit_message(&self.http, MessageId(ballot.message_id as u64), |m| {
                m.content(body);
                m.components(|c| {
                    vote_buttons(c, case_id, allow_retract);
                    c
                })
            })
            .await?;
        Ok(())
    }

    async fn close_ballot(&self, ballot: BallotRef, body: &str) -> Result<(), anyhow::Error> {
        ChannelId(ballot.channel_id as u64)
            .edit_message(&self.http, MessageId(ballot.message_id as u64), |m| {
                m.content(body);
                m.components(|c| c)
            })
            .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: i64, message_id: i64) -> Result<(), anyhow::Error> {
        ChannelId(channel_id as u64)
            .delete_message(&self.http, MessageId(message_id as u64))
            .await?;
        Ok(())
    }

    async fn member_count(&self, guild_id: i64) -> Result<u64, anyhow::Error> {
        let guild = self.http.get_guild_with_counts(guild_id as u64).await?;
        guild
            .approximate_member_count
            .ok_or_else(|| anyhow!("no member count for guild {}", guild_id))
    }

    /// The owner plus every member holding a role with the administrator
    /// permission. Bounded by one page of the member list; plenty for the
    /// guild sizes this bot moderates.
    async fn admin_ids(&self, guild_id: i64) -> Result<HashSet<i64>, anyhow::Error> {
        let guild = self.http.get_guild(guild_id as u64).await?;
        let admin_roles: HashSet<RoleId> = guild
            .roles
            .iter()
            .filter(|(_, role)| role.permissions.administrator())
            .map(|(role_id, _)| *role_id)
            .collect();
        let members = self
            .http
            .get_guild_members(guild_id as u64, Some(1000), None)
            .await?;
        let mut ids: HashSet<i64> = members
            .iter()
            .filter(|m| m.roles.iter().any(|r| admin_roles.contains(r)))
            .map(|m| m.user.id.0 as i64)
            .collect();
        ids.insert(guild.owner_id.0 as i64);
        Ok(ids)
    }

    async fn ban_member(
        &self,
        guild_id: i64,
        user_id: i64,
        reason: &str,
    ) -> Result<(), anyhow::Error> {
        let member = self.http.get_member(guild_id as u64, user_id as u64).await?;
        member.ban_with_reason(&self.http, 0, reason).await?;
        Ok(())
    }

    async fn unban_member(&self, guild_id: i64, user_id: i64) -> Result<(), anyhow::Error> {
        GuildId(guild_id as u64)
            .unban(&self.http, UserId(user_id as u64))
            .await?;
        Ok(())
    }

    async fn mute_member(
        &self,
        guild_id: i64,
        user_id: i64,
        until: NaiveDateTime,
    ) -> Result<(), anyhow::Error> {
        let mut member = self.http.get_member(guild_id as u64, user_id as u64).await?;
        let until = DateTime::<Utc>::from_utc(until, Utc);
        let timestamp = Timestamp::from_unix_timestamp(until.timestamp())
            .map_err(|e| anyhow!("invalid mute deadline: {}", e))?;
        member
            .disable_communication_until_datetime(&self.http, timestamp)
            .await?;
        Ok(())
    }
}
