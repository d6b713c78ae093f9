use diesel::prelude::*;

use super::Database;
use crate::models::{NewVote, VoteDecision, VoteRecord};

impl Database {
    /// Record a member's current decision on a case. Last write wins: any
    /// previous vote by the same member is dropped first, so (case, voter)
    /// stays unique.
    pub async fn record_vote(
        &self,
        case: i32,
        voter: i64,
        choice: VoteDecision,
    ) -> Result<(), anyhow::Error> {
        let conn = self.pool.get()?;
        {
            use crate::schema::votes::dsl::*;
            diesel::delete(crate::schema::votes::table)
                .filter(case_id.eq(case).and(voter_id.eq(voter)))
                .execute(&conn)?;
        }
        let row = NewVote {
            case_id: case,
            voter_id: voter,
            decision: choice,
            updated_at: chrono::Utc::now().naive_utc(),
        };
        diesel::insert_into(crate::schema::votes::table)
            .values(&row)
            .execute(&conn)?;
        Ok(())
    }

    /// Remove the member's vote entirely. Returns how many rows went away
    /// (0 when the member had not voted).
    pub async fn retract_vote(&self, case: i32, voter: i64) -> Result<usize, anyhow::Error> {
        use crate::schema::votes::dsl::*;
        Ok(diesel::delete(crate::schema::votes::table)
            .filter(case_id.eq(case).and(voter_id.eq(voter)))
            .execute(&self.pool.get()?)?)
    }

    pub async fn get_votes(&self, case: i32) -> Result<Vec<VoteRecord>, anyhow::Error> {
        use crate::schema::votes::dsl::*;
        Ok(votes
            .filter(case_id.eq(case))
            .load::<VoteRecord>(&self.pool.get()?)?)
    }
}
