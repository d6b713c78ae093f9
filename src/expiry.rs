use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDateTime, Utc};
use tokio::sync::Notify;
use tokio::time::sleep;

use crate::cases::CaseService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: NaiveDateTime,
    case_id: i32,
}

/// One time-ordered queue of case deadlines drained by a single loop,
/// instead of a detached timer per case. Entries are hints, not state: the
/// loop re-reads the case before acting, so duplicates and stale entries are
/// harmless, and nothing here survives a restart (the startup sweep re-arms
/// what is still pending).
#[derive(Default)]
pub struct ExpiryQueue {
    pending: Mutex<BinaryHeap<Reverse<Deadline>>>,
    bell: Notify,
}

impl ExpiryQueue {
    pub fn new() -> ExpiryQueue {
        ExpiryQueue::default()
    }

    pub fn schedule(&self, case_id: i32, at: NaiveDateTime) {
        self.pending
            .lock()
            .unwrap()
            .push(Reverse(Deadline { at, case_id }));
        self.bell.notify_one();
    }

    fn next_deadline(&self) -> Option<Deadline> {
        self.pending.lock().unwrap().peek().map(|d| d.0)
    }

    fn pop_due(&self, now: NaiveDateTime) -> Option<i32> {
        let mut pending = self.pending.lock().unwrap();
        match pending.peek() {
            Some(Reverse(deadline)) if deadline.at <= now => {
                let deadline = pending.pop().unwrap().0;
                Some(deadline.case_id)
            }
            _ => None,
        }
    }

    /// Sleep until the earliest pending deadline, wake early when a new case
    /// is scheduled, and hand due cases to the engine one at a time.
    pub async fn run(self: Arc<Self>, cases: Arc<CaseService>) {
        loop {
            let now = Utc::now().naive_utc();
            if let Some(case_id) = self.pop_due(now) {
                if let Err(e) = cases.expire_case(case_id).await {
                    error!("timer expiry of case #{} failed: {:#}", case_id, e);
                }
                continue;
            }
            match self.next_deadline() {
                Some(deadline) => {
                    let wait = (deadline.at - now).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = self.bell.notified() => {}
                    }
                }
                None => self.bell.notified().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pops_earliest_deadline_first() {
        let queue = ExpiryQueue::new();
        let now = Utc::now().naive_utc();
        queue.schedule(1, now - Duration::seconds(10));
        queue.schedule(2, now - Duration::seconds(30));
        queue.schedule(3, now + Duration::seconds(30));

        assert_eq!(queue.pop_due(now), Some(2));
        assert_eq!(queue.pop_due(now), Some(1));
        // the remaining entry is not due yet
        assert_eq!(queue.pop_due(now), None);
        assert_eq!(
            queue.next_deadline().map(|d| d.case_id),
            Some(3),
        );
    }

    #[test]
    fn empty_queue_has_nothing_due() {
        let queue = ExpiryQueue::new();
        assert_eq!(queue.pop_due(Utc::now().naive_utc()), None);
        assert_eq!(queue.next_deadline(), None);
    }
}
