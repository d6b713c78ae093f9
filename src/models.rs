use std::fmt;
use std::io::Write;

use chrono::NaiveDateTime;
use diesel::deserialize::{self, FromSql};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;

use crate::schema::{blacklist, cases, chats, votes};
use crate::settings::ChatSettings;
use crate::transport::BallotRef;

/// Where a case stands. Transitions are one-directional: a case leaves
/// `Open` exactly once and never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[sql_type = "Text"]
pub enum CaseStatus {
    Open,
    Confirmed,
    Rejected,
    Expired,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Confirmed => "confirmed",
            CaseStatus::Rejected => "rejected",
            CaseStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<CaseStatus> {
        match value {
            "open" => Some(CaseStatus::Open),
            "confirmed" => Some(CaseStatus::Confirmed),
            "rejected" => Some(CaseStatus::Rejected),
            "expired" => Some(CaseStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql<Text, Sqlite> for CaseStatus {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Sqlite>) -> serialize::Result {
        <str as ToSql<Text, Sqlite>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Sqlite> for CaseStatus {
    fn from_sql(bytes: Option<&<Sqlite as diesel::backend::Backend>::RawValue>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        CaseStatus::parse(&raw).ok_or_else(|| format!("unrecognized case status: {}", raw).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[sql_type = "Text"]
pub enum VoteDecision {
    Spam,
    NotSpam,
}

impl VoteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDecision::Spam => "spam",
            VoteDecision::NotSpam => "not_spam",
        }
    }

    pub fn parse(value: &str) -> Option<VoteDecision> {
        match value {
            "spam" => Some(VoteDecision::Spam),
            "not_spam" => Some(VoteDecision::NotSpam),
            _ => None,
        }
    }
}

impl ToSql<Text, Sqlite> for VoteDecision {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Sqlite>) -> serialize::Result {
        <str as ToSql<Text, Sqlite>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Sqlite> for VoteDecision {
    fn from_sql(bytes: Option<&<Sqlite as diesel::backend::Backend>::RawValue>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        VoteDecision::parse(&raw).ok_or_else(|| format!("unrecognized vote decision: {}", raw).into())
    }
}

/// One report under adjudication. Rows are never deleted; resolved cases
/// double as the moderation history.
#[derive(Queryable, Clone, Debug)]
pub struct CaseRecord {
    pub id: i32,
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: i64,
    pub offender_id: i64,
    pub reporter_id: i64,
    pub status: CaseStatus,
    pub opened_at: NaiveDateTime,
    pub closes_at: NaiveDateTime,
    pub ballot_channel_id: Option<i64>,
    pub ballot_message_id: Option<i64>,
    pub settings_snapshot: String,
    pub participant_target: i32,
}

impl CaseRecord {
    /// Settings in effect when the case was opened. Chat-level edits made
    /// afterwards never apply to a case already in flight.
    pub fn settings(&self) -> Result<ChatSettings, anyhow::Error> {
        Ok(serde_json::from_str(&self.settings_snapshot)?)
    }

    pub fn ballot(&self) -> Option<BallotRef> {
        match (self.ballot_channel_id, self.ballot_message_id) {
            (Some(channel_id), Some(message_id)) => Some(BallotRef {
                channel_id,
                message_id,
            }),
            _ => None,
        }
    }
}

#[derive(Insertable)]
#[table_name = "cases"]
pub struct NewCase {
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: i64,
    pub offender_id: i64,
    pub reporter_id: i64,
    pub status: CaseStatus,
    pub opened_at: NaiveDateTime,
    pub closes_at: NaiveDateTime,
    pub settings_snapshot: String,
    pub participant_target: i32,
}

#[derive(Queryable, Clone, Debug)]
pub struct VoteRecord {
    pub case_id: i32,
    pub voter_id: i64,
    pub decision: VoteDecision,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[table_name = "votes"]
pub struct NewVote {
    pub case_id: i32,
    pub voter_id: i64,
    pub decision: VoteDecision,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Clone, Debug)]
#[table_name = "chats"]
pub struct ChatRow {
    pub guild_id: i64,
    pub title: String,
    pub settings: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[table_name = "blacklist"]
pub struct NewBlacklistEntry {
    pub guild_id: i64,
    pub user_id: i64,
    pub reason: Option<String>,
    pub added_at: NaiveDateTime,
}
