use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::Database;
use crate::cases::Report;
use crate::models::{CaseRecord, CaseStatus, NewCase};
use crate::settings::ChatSettings;
use crate::transport::BallotRef;

impl Database {
    /// Insert a new open case carrying a snapshot of the settings in effect.
    /// The UNIQUE(guild_id, message_id) constraint turns a racing duplicate
    /// report into a database error instead of a second case.
    pub async fn create_case(
        &self,
        report: &Report,
        deadline: NaiveDateTime,
        snapshot: &ChatSettings,
        target: i32,
    ) -> Result<CaseRecord, anyhow::Error> {
        let row = NewCase {
            guild_id: report.guild_id,
            channel_id: report.channel_id,
            message_id: report.message_id,
            offender_id: report.offender_id,
            reporter_id: report.reporter_id,
            status: CaseStatus::Open,
            opened_at: chrono::Utc::now().naive_utc(),
            closes_at: deadline,
            settings_snapshot: serde_json::to_string(snapshot)?,
            participant_target: target,
        };
        diesel::insert_into(crate::schema::cases::table)
            .values(&row)
            .execute(&self.pool.get()?)?;

        use crate::schema::cases::dsl::*;
        Ok(cases
            .filter(
                guild_id
                    .eq(report.guild_id)
                    .and(message_id.eq(report.message_id)),
            )
            .first::<CaseRecord>(&self.pool.get()?)?)
    }

    pub async fn get_case(&self, case: i32) -> Result<Option<CaseRecord>, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        Ok(cases
            .filter(id.eq(case))
            .first::<CaseRecord>(&self.pool.get()?)
            .optional()?)
    }

    pub async fn get_case_by_message(
        &self,
        guild: i64,
        message: i64,
    ) -> Result<Option<CaseRecord>, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        Ok(cases
            .filter(guild_id.eq(guild).and(message_id.eq(message)))
            .first::<CaseRecord>(&self.pool.get()?)
            .optional()?)
    }

    pub async fn update_case_ballot(
        &self,
        case: i32,
        ballot: BallotRef,
    ) -> Result<usize, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        Ok(diesel::update(cases.filter(id.eq(case)))
            .set((
                ballot_channel_id.eq(Some(ballot.channel_id)),
                ballot_message_id.eq(Some(ballot.message_id)),
            ))
            .execute(&self.pool.get()?)?)
    }

    /// Guarded transition out of OPEN. Returns false when the case had
    /// already left OPEN, so a racing vote-path and timer-path resolution
    /// collapse into one winner.
    pub async fn set_case_status_if_open(
        &self,
        case: i32,
        new_status: CaseStatus,
    ) -> Result<bool, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        let changed = diesel::update(cases.filter(id.eq(case).and(status.eq(CaseStatus::Open))))
            .set(status.eq(new_status))
            .execute(&self.pool.get()?)?;
        Ok(changed == 1)
    }

    pub async fn list_open_cases(&self) -> Result<Vec<CaseRecord>, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        Ok(cases
            .filter(status.eq(CaseStatus::Open))
            .load::<CaseRecord>(&self.pool.get()?)?)
    }

    pub async fn list_recent_cases(
        &self,
        guild: i64,
        limit: i64,
    ) -> Result<Vec<CaseRecord>, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        Ok(cases
            .filter(guild_id.eq(guild))
            .order(opened_at.desc())
            .limit(limit)
            .load::<CaseRecord>(&self.pool.get()?)?)
    }

    /// How many cases this reporter opened in the chat since the given
    /// instant. The hourly rate limit is a plain count over this window.
    pub async fn count_recent_reports(
        &self,
        guild: i64,
        reporter: i64,
        since: NaiveDateTime,
    ) -> Result<i64, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        Ok(cases
            .filter(
                guild_id
                    .eq(guild)
                    .and(reporter_id.eq(reporter))
                    .and(opened_at.ge(since)),
            )
            .count()
            .get_result::<i64>(&self.pool.get()?)?)
    }

    #[cfg(test)]
    pub async fn backdate_case(
        &self,
        case: i32,
        opened: NaiveDateTime,
    ) -> Result<usize, anyhow::Error> {
        use crate::schema::cases::dsl::*;
        Ok(diesel::update(cases.filter(id.eq(case)))
            .set(opened_at.eq(opened))
            .execute(&self.pool.get()?)?)
    }
}
