use chrono::NaiveDateTime;

use crate::models::{VoteDecision, VoteRecord};
use crate::settings::{ChatSettings, QuorumStrategy};

/// Vote counts for one case, recomputed from the authoritative vote set on
/// every evaluation. Never cached incrementally; per-case vote volume is
/// small enough that recounting is the simpler correct option.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub spam: i64,
    pub not_spam: i64,
}

impl Tally {
    pub fn of(votes: &[VoteRecord]) -> Tally {
        let spam = votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Spam)
            .count() as i64;
        Tally {
            spam,
            not_spam: votes.len() as i64 - spam,
        }
    }

    pub fn total(&self) -> i64 {
        self.spam + self.not_spam
    }

    /// Share of Spam votes among all votes cast; 0.0 with no votes so an
    /// empty ballot can never clear the approval bar.
    pub fn spam_ratio(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.spam as f64 / self.total() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    StillOpen,
    Confirm,
    /// The deadline has passed; the case closes without a spam verdict no
    /// matter what the tally says.
    Timeout,
}

pub fn participation_met(total: i64, settings: &ChatSettings, participant_target: i32) -> bool {
    let count_met = total >= settings.min_participation_count as i64;
    let ratio_met = total >= participant_target as i64;
    match settings.quorum_strategy {
        QuorumStrategy::RatioOnly => ratio_met,
        QuorumStrategy::CountOnly => count_met,
        QuorumStrategy::RatioAndCount => ratio_met && count_met,
    }
}

/// Decide whether a case should leave the open state. The deadline check
/// comes first and short-circuits everything else: a late evaluation always
/// times the case out, even if the tally would otherwise confirm.
pub fn evaluate(
    tally: &Tally,
    settings: &ChatSettings,
    participant_target: i32,
    now: NaiveDateTime,
    closes_at: NaiveDateTime,
) -> Verdict {
    if now >= closes_at {
        return Verdict::Timeout;
    }
    let total = tally.total();
    if total == 0 {
        return Verdict::StillOpen;
    }
    if participation_met(total, settings, participant_target)
        && tally.spam_ratio() >= settings.approval_ratio
    {
        return Verdict::Confirm;
    }
    Verdict::StillOpen
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn settings(strategy: QuorumStrategy, min_count: i32, approval: f64) -> ChatSettings {
        ChatSettings {
            quorum_strategy: strategy,
            min_participation_count: min_count,
            approval_ratio: approval,
            ..ChatSettings::default()
        }
    }

    fn tally(spam: i64, not_spam: i64) -> Tally {
        Tally { spam, not_spam }
    }

    #[test]
    fn participation_table() {
        // (strategy, total, target, min_count, expected)
        let rows = [
            (QuorumStrategy::RatioAndCount, 5, 5, 5, true),
            (QuorumStrategy::RatioAndCount, 4, 5, 5, false),
            (QuorumStrategy::RatioAndCount, 5, 3, 5, true),
            (QuorumStrategy::RatioAndCount, 4, 3, 5, false),
            (QuorumStrategy::RatioOnly, 4, 5, 5, false),
            (QuorumStrategy::RatioOnly, 6, 5, 99, true),
            (QuorumStrategy::CountOnly, 3, 5, 5, false),
            (QuorumStrategy::CountOnly, 6, 99, 5, true),
        ];
        for (strategy, total, target, min_count, expected) in rows {
            let settings = settings(strategy, min_count, 0.6);
            assert_eq!(
                participation_met(total, &settings, target),
                expected,
                "strategy={:?} total={} target={} min_count={}",
                strategy,
                total,
                target,
                min_count,
            );
        }
    }

    #[test]
    fn tally_counts_and_ratio() {
        let t = tally(3, 1);
        assert_eq!(t.total(), 4);
        assert!((t.spam_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(Tally::default().spam_ratio(), 0.0);
    }

    #[test]
    fn confirms_when_participation_and_ratio_met() {
        let now = Utc::now().naive_utc();
        let closes = now + Duration::minutes(5);
        let s = settings(QuorumStrategy::RatioAndCount, 3, 0.6);
        assert_eq!(evaluate(&tally(3, 0), &s, 3, now, closes), Verdict::Confirm);
        // ratio exactly at the bar counts
        assert_eq!(evaluate(&tally(3, 2), &s, 3, now, closes), Verdict::Confirm);
    }

    #[test]
    fn stays_open_below_either_bar() {
        let now = Utc::now().naive_utc();
        let closes = now + Duration::minutes(5);
        let s = settings(QuorumStrategy::RatioAndCount, 3, 0.6);
        // participation unmet
        assert_eq!(evaluate(&tally(2, 0), &s, 3, now, closes), Verdict::StillOpen);
        // approval unmet
        assert_eq!(evaluate(&tally(2, 2), &s, 3, now, closes), Verdict::StillOpen);
        // nobody voted
        assert_eq!(evaluate(&tally(0, 0), &s, 3, now, closes), Verdict::StillOpen);
    }

    #[test]
    fn deadline_dominates_a_winning_tally() {
        let now = Utc::now().naive_utc();
        let closes = now - Duration::seconds(1);
        let s = settings(QuorumStrategy::RatioAndCount, 3, 0.6);
        assert_eq!(evaluate(&tally(10, 0), &s, 3, now, closes), Verdict::Timeout);
        // also exactly at the boundary
        assert_eq!(evaluate(&tally(10, 0), &s, 3, now, now), Verdict::Timeout);
    }
}
