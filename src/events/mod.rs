use std::sync::Arc;

use clokwerk::{AsyncScheduler, TimeUnits};

use crate::cases::CaseService;

/// Periodic recovery sweep behind the in-process expiry loop; anything the
/// loop missed (or a deadline armed by a previous run of the process) gets
/// closed here.
pub fn setup_schedulers(scheduler: &mut AsyncScheduler, cases: Arc<CaseService>) {
    scheduler.every(5.minutes()).run(move || {
        let cases = cases.clone();
        async move {
            match cases.expire_overdue_cases().await {
                Ok(0) => {}
                Ok(n) => info!("recovery sweep expired {} overdue case(s)", n),
                Err(e) => error!("recovery sweep failed: {:#}", e),
            }
        }
    });
}
