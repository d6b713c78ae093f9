use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use chrono::{Duration, Utc};
use serenity::prelude::TypeMapKey;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::database::Database;
use crate::expiry::ExpiryQueue;
use crate::models::{CaseRecord, CaseStatus, VoteDecision};
use crate::quorum::{self, Tally, Verdict};
use crate::settings::{self, ChatSettings, EnforceAction};
use crate::transport::ChatTransport;

/// Member count assumed when the transport cannot provide one. Degraded
/// mode: a report must still open a case.
const FALLBACK_MEMBER_COUNT: u64 = 100;

/// The transport only knows bans; a kick is a ban lifted after this delay so
/// the member can rejoin on their own.
const KICK_UNBAN_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

const RATE_LIMIT_WINDOW_MINUTES: i64 = 60;

/// A `spam` report with every identity already resolved by the command
/// layer.
#[derive(Debug, Clone)]
pub struct Report {
    pub guild_id: i64,
    pub guild_title: String,
    pub channel_id: i64,
    pub message_id: i64,
    pub offender_id: i64,
    pub reporter_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Cast(VoteDecision),
    Retract,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("reply to the offending message when reporting it")]
    NotAReply,
    #[error("the sender of that message could not be identified")]
    UnknownOffender,
    #[error("you are reporting too often, try again later")]
    RateLimited,
    #[error("that message is already under vote in case #{0}, join the ballot instead")]
    DuplicateOpen(i32),
    #[error("that message was already handled in case #{case_id} ({status})")]
    DuplicateResolved { case_id: i32, status: CaseStatus },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("that case does not exist")]
    CaseNotFound,
    #[error("that case is already closed")]
    CaseClosed,
    #[error("vote retraction is disabled in this server")]
    RetractDisabled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// How a case leaves the open state. Rejected and Expired describe the same
/// condition reached through different paths (a vote landing at/after the
/// deadline vs the timer); only the closing message differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Confirmed,
    Rejected,
    Expired,
}

/// Owns the case state machine: creation, vote application, resolution and
/// enforcement. All case mutations in the process go through this service.
pub struct CaseService {
    db: Arc<Database>,
    transport: Arc<dyn ChatTransport>,
    defaults: ChatSettings,
    expiry: Arc<ExpiryQueue>,
    case_locks: Mutex<HashMap<i32, Arc<AsyncMutex<()>>>>,
}

impl CaseService {
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn ChatTransport>,
        defaults: ChatSettings,
        expiry: Arc<ExpiryQueue>,
    ) -> CaseService {
        CaseService {
            db,
            transport,
            defaults,
            expiry,
            case_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Vote-path and timer-path resolution can race on the same case; every
    /// mutating operation serializes on this per-case lock.
    fn lock_for(&self, case_id: i32) -> Arc<AsyncMutex<()>> {
        self.case_locks
            .lock()
            .unwrap()
            .entry(case_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn effective_settings(&self, guild_id: i64) -> Result<ChatSettings, anyhow::Error> {
        let overrides = self.db.get_chat_settings(guild_id).await?;
        Ok(settings::resolve(&self.defaults, overrides.as_ref())?)
    }

    /// Open a case for a report: rate-limit the reporter, refuse duplicates,
    /// fix the participant target from the current member count, post the
    /// ballot and arm the expiry timer.
    pub async fn create_case(&self, report: Report) -> Result<CaseRecord, ReportError> {
        self.db
            .upsert_chat(report.guild_id, &report.guild_title)
            .await?;
        let chat_settings = self.effective_settings(report.guild_id).await?;

        let now = Utc::now().naive_utc();
        let since = now - Duration::minutes(RATE_LIMIT_WINDOW_MINUTES);
        let recent = self
            .db
            .count_recent_reports(report.guild_id, report.reporter_id, since)
            .await?;
        if recent >= chat_settings.max_cases_per_user_hour as i64 {
            return Err(ReportError::RateLimited);
        }

        if let Some(existing) = self
            .db
            .get_case_by_message(report.guild_id, report.message_id)
            .await?
        {
            return Err(duplicate_rejection(existing));
        }

        let member_count = match self.transport.member_count(report.guild_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    "member count unavailable for guild {}, assuming {}: {:#}",
                    report.guild_id, FALLBACK_MEMBER_COUNT, e
                );
                FALLBACK_MEMBER_COUNT
            }
        };
        let target = participant_target(&chat_settings, member_count);
        let closes_at = now + Duration::seconds(chat_settings.vote_timeout_sec);

        let mut case = match self
            .db
            .create_case(&report, closes_at, &chat_settings, target)
            .await
        {
            Ok(case) => case,
            Err(e) if is_unique_violation(&e) => {
                // lost a race against a simultaneous report of the same message
                return Err(match self
                    .db
                    .get_case_by_message(report.guild_id, report.message_id)
                    .await?
                {
                    Some(existing) => duplicate_rejection(existing),
                    None => ReportError::Internal(e),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let body = ballot_text(&case, &chat_settings, Tally::default());
        let ballot = self
            .transport
            .post_ballot(
                case.channel_id,
                case.message_id,
                case.id,
                &body,
                chat_settings.allow_vote_retract,
            )
            .await
            .context("failed to post the ballot message")?;
        self.db.update_case_ballot(case.id, ballot).await?;
        case.ballot_channel_id = Some(ballot.channel_id);
        case.ballot_message_id = Some(ballot.message_id);

        self.expiry.schedule(case.id, closes_at);
        info!(
            "opened case #{} in guild {} against user {} (target {}, closes {})",
            case.id, case.guild_id, case.offender_id, target, closes_at
        );
        Ok(case)
    }

    /// Apply a vote mutation and re-evaluate the case. The only path besides
    /// the timer by which an open case progresses.
    pub async fn apply_vote(
        &self,
        case_id: i32,
        voter_id: i64,
        action: VoteAction,
    ) -> Result<(), VoteError> {
        let lock = self.lock_for(case_id);
        let _guard = lock.lock().await;

        let case = self
            .db
            .get_case(case_id)
            .await?
            .ok_or(VoteError::CaseNotFound)?;
        if case.status != CaseStatus::Open {
            return Err(VoteError::CaseClosed);
        }
        let chat_settings = case.settings()?;

        match action {
            VoteAction::Retract if !chat_settings.allow_vote_retract => {
                return Err(VoteError::RetractDisabled);
            }
            VoteAction::Retract => {
                self.db.retract_vote(case_id, voter_id).await?;
            }
            VoteAction::Cast(decision) => {
                self.db.record_vote(case_id, voter_id, decision).await?;
            }
        }

        let votes = self.db.get_votes(case_id).await?;
        let tally = Tally::of(&votes);
        match quorum::evaluate(
            &tally,
            &chat_settings,
            case.participant_target,
            Utc::now().naive_utc(),
            case.closes_at,
        ) {
            Verdict::StillOpen => {
                if let Some(ballot) = case.ballot() {
                    let body = ballot_text(&case, &chat_settings, tally);
                    if let Err(e) = self
                        .transport
                        .refresh_ballot(ballot, case.id, &body, chat_settings.allow_vote_retract)
                        .await
                    {
                        warn!("failed to refresh ballot for case #{}: {:#}", case.id, e);
                    }
                }
            }
            Verdict::Confirm => self.resolve(&case, &chat_settings, Outcome::Confirmed).await?,
            Verdict::Timeout => self.resolve(&case, &chat_settings, Outcome::Rejected).await?,
        }
        Ok(())
    }

    /// Timer-path resolution. Re-reads the case and does nothing unless it is
    /// still open and actually past its deadline, so duplicate or stale queue
    /// entries are no-ops.
    pub async fn expire_case(&self, case_id: i32) -> Result<(), anyhow::Error> {
        let lock = self.lock_for(case_id);
        let _guard = lock.lock().await;

        let case = match self.db.get_case(case_id).await? {
            Some(case) => case,
            None => return Ok(()),
        };
        if case.status != CaseStatus::Open {
            return Ok(());
        }
        if Utc::now().naive_utc() < case.closes_at {
            return Ok(());
        }
        let chat_settings = case.settings()?;
        self.resolve(&case, &chat_settings, Outcome::Expired).await
    }

    /// Recovery sweep over open cases whose deadline already passed; covers
    /// timers lost to a restart. Returns how many cases were closed.
    pub async fn expire_overdue_cases(&self) -> Result<usize, anyhow::Error> {
        let now = Utc::now().naive_utc();
        let mut closed = 0;
        for case in self.db.list_open_cases().await? {
            if now < case.closes_at {
                continue;
            }
            match self.expire_case(case.id).await {
                Ok(()) => closed += 1,
                Err(e) => error!("failed to expire overdue case #{}: {:#}", case.id, e),
            }
        }
        Ok(closed)
    }

    /// Re-arm the expiry queue for open cases still inside their voting
    /// window. Run once at startup, after the overdue sweep.
    pub async fn reschedule_pending(&self) -> Result<usize, anyhow::Error> {
        let now = Utc::now().naive_utc();
        let mut armed = 0;
        for case in self.db.list_open_cases().await? {
            if case.closes_at > now {
                self.expiry.schedule(case.id, case.closes_at);
                armed += 1;
            }
        }
        if armed > 0 {
            info!("re-armed deadlines for {} open case(s)", armed);
        }
        Ok(armed)
    }

    /// Commit the terminal transition, then run side effects. The guarded
    /// status update decides the winner of any vote/timer race; the loser
    /// returns without touching enforcement or the ballot.
    async fn resolve(
        &self,
        case: &CaseRecord,
        chat_settings: &ChatSettings,
        outcome: Outcome,
    ) -> Result<(), anyhow::Error> {
        let new_status = match outcome {
            Outcome::Confirmed => CaseStatus::Confirmed,
            Outcome::Rejected => CaseStatus::Rejected,
            Outcome::Expired => CaseStatus::Expired,
        };
        if !self.db.set_case_status_if_open(case.id, new_status).await? {
            return Ok(());
        }
        info!("case #{} resolved as {}", case.id, new_status);

        if outcome == Outcome::Confirmed {
            self.enforce(case, chat_settings).await;
        }

        if let Some(ballot) = case.ballot() {
            let body = final_text(case, chat_settings, outcome);
            if let Err(e) = self.transport.close_ballot(ballot, &body).await {
                warn!("failed to post the verdict for case #{}: {:#}", case.id, e);
            }
        }
        Ok(())
    }

    /// Runs exactly once per confirmed case, after the transition committed.
    /// Sub-step failures are logged and isolated; none of them may stop the
    /// remaining steps.
    async fn enforce(&self, case: &CaseRecord, chat_settings: &ChatSettings) {
        if let Err(e) = self
            .transport
            .delete_message(case.channel_id, case.message_id)
            .await
        {
            info!(
                "could not delete reported message for case #{} (may already be gone): {:#}",
                case.id, e
            );
        }

        let reason = format!("Voted out by the spam jury (case #{})", case.id);
        match chat_settings.action_on_confirm {
            EnforceAction::DeleteOnly => {}
            EnforceAction::Ban => {
                if let Err(e) = self
                    .transport
                    .ban_member(case.guild_id, case.offender_id, &reason)
                    .await
                {
                    warn!("ban failed for case #{}: {:#}", case.id, e);
                }
            }
            EnforceAction::Kick => {
                match self
                    .transport
                    .ban_member(case.guild_id, case.offender_id, &reason)
                    .await
                {
                    Ok(()) => {
                        tokio::time::sleep(KICK_UNBAN_DELAY).await;
                        if let Err(e) = self
                            .transport
                            .unban_member(case.guild_id, case.offender_id)
                            .await
                        {
                            warn!("unban after kick failed for case #{}: {:#}", case.id, e);
                        }
                    }
                    Err(e) => warn!("kick failed for case #{}: {:#}", case.id, e),
                }
            }
            EnforceAction::Mute => {
                let until =
                    Utc::now().naive_utc() + Duration::seconds(chat_settings.mute_duration_sec);
                if let Err(e) = self
                    .transport
                    .mute_member(case.guild_id, case.offender_id, until)
                    .await
                {
                    warn!("mute failed for case #{}: {:#}", case.id, e);
                }
            }
        }

        if chat_settings.blacklist_enabled {
            if let Err(e) = self
                .db
                .blacklist_add(
                    case.guild_id,
                    case.offender_id,
                    Some(&format!("Case #{}", case.id)),
                )
                .await
            {
                error!("failed to blacklist offender for case #{}: {:#}", case.id, e);
            }
        }
    }
}

impl TypeMapKey for CaseService {
    type Value = Arc<CaseService>;
}

fn duplicate_rejection(existing: CaseRecord) -> ReportError {
    match existing.status {
        CaseStatus::Open => ReportError::DuplicateOpen(existing.id),
        status => ReportError::DuplicateResolved {
            case_id: existing.id,
            status,
        },
    }
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<diesel::result::Error>(),
        Some(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        ))
    )
}

/// Votes required by the ratio threshold, fixed at creation from the chat's
/// member count at that moment.
fn participant_target(chat_settings: &ChatSettings, member_count: u64) -> i32 {
    let by_ratio = (chat_settings.min_participation_ratio * member_count as f64).ceil() as i32;
    chat_settings.min_participation_count.max(by_ratio)
}

fn ballot_text(case: &CaseRecord, chat_settings: &ChatSettings, tally: Tally) -> String {
    let remaining = (case.participant_target as i64 - tally.total()).max(0);
    format!(
        "This message was reported as suspected spam. Vote to decide.\n\
         Case #{}\n\
         At least {} participants and {:.0}% spam votes required\n\
         Spam {} / Not spam {} / Total {}\n\
         {} more participant(s) needed\n\
         Voting closes at {} UTC",
        case.id,
        case.participant_target,
        chat_settings.approval_ratio * 100.0,
        tally.spam,
        tally.not_spam,
        tally.total(),
        remaining,
        case.closes_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

fn final_text(case: &CaseRecord, chat_settings: &ChatSettings, outcome: Outcome) -> String {
    match outcome {
        Outcome::Confirmed => format!(
            "The jury confirmed this message as spam. Case #{} closed, action taken: {}.",
            case.id, chat_settings.action_on_confirm
        ),
        Outcome::Rejected => format!(
            "Voting closed without enough support to confirm spam. Case #{} rejected.",
            case.id
        ),
        Outcome::Expired => format!(
            "Voting timed out before reaching a verdict. Case #{} expired.",
            case.id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

    use chrono::NaiveDateTime;
    use serenity::async_trait;

    use crate::settings::QuorumStrategy;
    use crate::transport::BallotRef;

    #[derive(Default)]
    struct MockTransport {
        fail_post: AtomicBool,
        fail_ban: AtomicBool,
        fail_member_count: AtomicBool,
        ballot_counter: AtomicI64,
        refreshes: AtomicUsize,
        closed: Mutex<Vec<String>>,
        deleted: Mutex<Vec<(i64, i64)>>,
        banned: Mutex<Vec<i64>>,
        unbanned: Mutex<Vec<i64>>,
        muted: Mutex<Vec<(i64, NaiveDateTime)>>,
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn post_ballot(
            &self,
            channel_id: i64,
            _reply_to: i64,
            _case_id: i32,
            _body: &str,
            _allow_retract: bool,
        ) -> Result<BallotRef, anyhow::Error> {
            if self.fail_post.load(Ordering::SeqCst) {
                anyhow::bail!("message send refused");
            }
            let message_id = 9000 + self.ballot_counter.fetch_add(1, Ordering::SeqCst);
            Ok(BallotRef {
                channel_id,
                message_id,
            })
        }

        async fn refresh_ballot(
            &self,
            _ballot: BallotRef,
            _case_id: i32,
            _body: &str,
            _allow_retract: bool,
        ) -> Result<(), anyhow::Error> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close_ballot(&self, _ballot: BallotRef, body: &str) -> Result<(), anyhow::Error> {
            self.closed.lock().unwrap().push(body.to_string());
            Ok(())
        }

        async fn delete_message(
            &self,
            channel_id: i64,
            message_id: i64,
        ) -> Result<(), anyhow::Error> {
            self.deleted.lock().unwrap().push((channel_id, message_id));
            Ok(())
        }

        async fn member_count(&self, _guild_id: i64) -> Result<u64, anyhow::Error> {
            if self.fail_member_count.load(Ordering::SeqCst) {
                anyhow::bail!("counts unavailable");
            }
            Ok(40)
        }

        async fn admin_ids(&self, _guild_id: i64) -> Result<HashSet<i64>, anyhow::Error> {
            Ok(HashSet::new())
        }

        async fn ban_member(
            &self,
            _guild_id: i64,
            user_id: i64,
            _reason: &str,
        ) -> Result<(), anyhow::Error> {
            if self.fail_ban.load(Ordering::SeqCst) {
                anyhow::bail!("missing permission");
            }
            self.banned.lock().unwrap().push(user_id);
            Ok(())
        }

        async fn unban_member(&self, _guild_id: i64, user_id: i64) -> Result<(), anyhow::Error> {
            self.unbanned.lock().unwrap().push(user_id);
            Ok(())
        }

        async fn mute_member(
            &self,
            _guild_id: i64,
            user_id: i64,
            until: NaiveDateTime,
        ) -> Result<(), anyhow::Error> {
            self.muted.lock().unwrap().push((user_id, until));
            Ok(())
        }
    }

    fn test_defaults() -> ChatSettings {
        ChatSettings {
            min_participation_count: 3,
            min_participation_ratio: 0.05,
            approval_ratio: 0.6,
            quorum_strategy: QuorumStrategy::RatioAndCount,
            vote_timeout_sec: 600,
            ..ChatSettings::default()
        }
    }

    fn service_with(
        defaults: ChatSettings,
    ) -> (Arc<CaseService>, Arc<MockTransport>, Arc<Database>) {
        let db = Arc::new(Database::connect_in_memory());
        let mock = Arc::new(MockTransport::default());
        let transport: Arc<dyn ChatTransport> = mock.clone();
        let cases = Arc::new(CaseService::new(
            db.clone(),
            transport,
            defaults,
            Arc::new(ExpiryQueue::new()),
        ));
        (cases, mock, db)
    }

    fn report(message_id: i64) -> Report {
        Report {
            guild_id: -100,
            guild_title: "testing ground".to_string(),
            channel_id: 555,
            message_id,
            offender_id: 1001,
            reporter_id: 2002,
        }
    }

    #[test]
    fn participant_target_takes_the_larger_bound() {
        let mut s = test_defaults();
        s.min_participation_count = 3;
        s.min_participation_ratio = 0.05;
        assert_eq!(participant_target(&s, 40), 3);
        assert_eq!(participant_target(&s, 200), 10);
        s.min_participation_ratio = 0.0;
        assert_eq!(participant_target(&s, 10_000), 3);
    }

    #[tokio::test]
    async fn confirmation_enforces_exactly_once() {
        let (cases, mock, db) = service_with(test_defaults());
        let case = cases.create_case(report(42)).await.unwrap();
        assert_eq!(case.participant_target, 3);
        assert!(case.ballot().is_some());

        cases
            .apply_vote(case.id, 1, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap();
        cases
            .apply_vote(case.id, 2, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap();
        // two open-ballot refreshes so far, no verdict yet
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 2);
        cases
            .apply_vote(case.id, 3, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap();

        let stored = db.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Confirmed);
        assert_eq!(mock.deleted.lock().unwrap().len(), 1);
        assert_eq!(mock.banned.lock().unwrap().as_slice(), &[1001]);
        assert!(db.blacklist_contains(-100, 1001).await.unwrap());
        assert_eq!(mock.closed.lock().unwrap().len(), 1);

        // a late vote is rejected and nothing re-fires
        let err = cases
            .apply_vote(case.id, 4, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap_err();
        assert!(matches!(err, VoteError::CaseClosed));
        cases.expire_case(case.id).await.unwrap();
        let stored = db.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Confirmed);
        assert_eq!(mock.banned.lock().unwrap().len(), 1);
        assert_eq!(mock.closed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vote_replace_and_retract() {
        let (cases, _mock, db) = service_with(test_defaults());
        let case = cases.create_case(report(43)).await.unwrap();

        cases
            .apply_vote(case.id, 7, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap();
        cases
            .apply_vote(case.id, 7, VoteAction::Cast(VoteDecision::NotSpam))
            .await
            .unwrap();
        let votes = db.get_votes(case.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].decision, VoteDecision::NotSpam);

        cases
            .apply_vote(case.id, 7, VoteAction::Retract)
            .await
            .unwrap();
        assert!(db.get_votes(case.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retract_rejected_when_disallowed() {
        let defaults = ChatSettings {
            allow_vote_retract: false,
            ..test_defaults()
        };
        let (cases, _mock, db) = service_with(defaults);
        let case = cases.create_case(report(44)).await.unwrap();
        cases
            .apply_vote(case.id, 7, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap();

        let err = cases
            .apply_vote(case.id, 7, VoteAction::Retract)
            .await
            .unwrap_err();
        assert!(matches!(err, VoteError::RetractDisabled));
        // the tally is untouched
        assert_eq!(db.get_votes(case.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vote_on_unknown_case_is_rejected() {
        let (cases, _mock, _db) = service_with(test_defaults());
        let err = cases
            .apply_vote(999, 7, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap_err();
        assert!(matches!(err, VoteError::CaseNotFound));
    }

    #[tokio::test]
    async fn deadline_dominates_even_a_winning_vote() {
        let (cases, mock, db) = service_with(test_defaults());
        let chat_settings = test_defaults();
        let overdue = Utc::now().naive_utc() - Duration::seconds(5);
        let case = db
            .create_case(&report(45), overdue, &chat_settings, 1)
            .await
            .unwrap();

        // the tally alone would confirm, but the window is already shut
        cases
            .apply_vote(case.id, 1, VoteAction::Cast(VoteDecision::Spam))
            .await
            .unwrap();
        let stored = db.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Rejected);
        assert!(mock.banned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timer_path_expires_and_sweep_is_idempotent() {
        let (cases, mock, db) = service_with(test_defaults());
        let chat_settings = test_defaults();
        let overdue = Utc::now().naive_utc() - Duration::seconds(5);
        let case = db
            .create_case(&report(46), overdue, &chat_settings, 3)
            .await
            .unwrap();

        assert_eq!(cases.expire_overdue_cases().await.unwrap(), 1);
        let stored = db.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Expired);
        assert!(mock.banned.lock().unwrap().is_empty());

        // nothing left to do on a second pass
        assert_eq!(cases.expire_overdue_cases().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rate_limit_caps_and_ages_out() {
        let defaults = ChatSettings {
            max_cases_per_user_hour: 2,
            ..test_defaults()
        };
        let (cases, _mock, db) = service_with(defaults);
        let first = cases.create_case(report(50)).await.unwrap();
        cases.create_case(report(51)).await.unwrap();

        let err = cases.create_case(report(52)).await.unwrap_err();
        assert!(matches!(err, ReportError::RateLimited));

        // once the oldest report leaves the window the reporter is allowed again
        let two_hours_ago = Utc::now().naive_utc() - Duration::hours(2);
        db.backdate_case(first.id, two_hours_ago).await.unwrap();
        cases.create_case(report(52)).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_reports_get_distinct_reasons() {
        let (cases, _mock, db) = service_with(test_defaults());
        let case = cases.create_case(report(60)).await.unwrap();

        let err = cases.create_case(report(60)).await.unwrap_err();
        assert!(matches!(err, ReportError::DuplicateOpen(id) if id == case.id));

        db.set_case_status_if_open(case.id, CaseStatus::Confirmed)
            .await
            .unwrap();
        let err = cases.create_case(report(60)).await.unwrap_err();
        assert!(matches!(
            err,
            ReportError::DuplicateResolved {
                status: CaseStatus::Confirmed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn member_count_failure_falls_back() {
        let defaults = ChatSettings {
            min_participation_ratio: 0.5,
            ..test_defaults()
        };
        let (cases, mock, _db) = service_with(defaults);
        mock.fail_member_count.store(true, Ordering::SeqCst);
        let case = cases.create_case(report(61)).await.unwrap();
        // ceil(0.5 * fallback 100) = 50
        assert_eq!(case.participant_target, 50);
    }

    #[tokio::test]
    async fn failed_ballot_post_leaves_an_inert_case() {
        let (cases, mock, db) = service_with(test_defaults());
        mock.fail_post.store(true, Ordering::SeqCst);

        let err = cases.create_case(report(62)).await.unwrap_err();
        assert!(matches!(err, ReportError::Internal(_)));

        // the row exists but carries no ballot reference
        let stored = db.get_case_by_message(-100, 62).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Open);
        assert!(stored.ballot().is_none());
    }

    #[tokio::test]
    async fn enforcement_substeps_are_isolated() {
        let (cases, mock, db) = service_with(test_defaults());
        mock.fail_ban.store(true, Ordering::SeqCst);
        let case = cases.create_case(report(70)).await.unwrap();
        for voter in 1..=3 {
            cases
                .apply_vote(case.id, voter, VoteAction::Cast(VoteDecision::Spam))
                .await
                .unwrap();
        }

        let stored = db.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Confirmed);
        // the ban failed, yet the delete ran and the blacklist entry landed
        assert!(mock.banned.lock().unwrap().is_empty());
        assert_eq!(mock.deleted.lock().unwrap().len(), 1);
        assert!(db.blacklist_contains(-100, 1001).await.unwrap());
    }

    #[tokio::test]
    async fn mute_action_restricts_until_deadline() {
        let defaults = ChatSettings {
            action_on_confirm: EnforceAction::Mute,
            mute_duration_sec: 900,
            ..test_defaults()
        };
        let (cases, mock, _db) = service_with(defaults);
        let case = cases.create_case(report(71)).await.unwrap();
        for voter in 1..=3 {
            cases
                .apply_vote(case.id, voter, VoteAction::Cast(VoteDecision::Spam))
                .await
                .unwrap();
        }

        let muted = mock.muted.lock().unwrap();
        assert_eq!(muted.len(), 1);
        assert_eq!(muted[0].0, 1001);
        let lower = Utc::now().naive_utc() + Duration::seconds(800);
        assert!(muted[0].1 > lower);
        assert!(mock.banned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn kick_bans_then_unbans() {
        let defaults = ChatSettings {
            action_on_confirm: EnforceAction::Kick,
            ..test_defaults()
        };
        let (cases, mock, _db) = service_with(defaults);
        let case = cases.create_case(report(72)).await.unwrap();
        for voter in 1..=3 {
            cases
                .apply_vote(case.id, voter, VoteAction::Cast(VoteDecision::Spam))
                .await
                .unwrap();
        }

        assert_eq!(mock.banned.lock().unwrap().as_slice(), &[1001]);
        assert_eq!(mock.unbanned.lock().unwrap().as_slice(), &[1001]);
    }
}
