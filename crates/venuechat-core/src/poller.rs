use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session::{PollStatus, VenueChatSession};

/// Start polling `session` every `config().poll_interval` in the
/// background. The task ends when the session is closed.
pub fn spawn_poller(session: VenueChatSession) -> JoinHandle<()> {
    let period = session.config().poll_interval;
    tokio::spawn(run_poll_loop(session, period))
}

/// Poll `session` every `period` until it is closed.
///
/// The first poll runs immediately. Failures are logged and the loop keeps
/// going: transport errors heal on a later tick, and an unauthenticated
/// caller may log in while the view stays open. Results reach the UI
/// through [`VenueChatSession::subscribe`].
pub async fn run_poll_loop(session: VenueChatSession, period: Duration) {
    let venue_id = session.venue_id();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(venue_id, period_ms = period.as_millis() as u64, "venue chat poller started");

    loop {
        tokio::select! {
            _ = session.closed() => break,
            _ = interval.tick() => {}
        }

        match session.poll().await {
            Ok(outcome) => match outcome.status {
                PollStatus::Merged => {
                    debug!(venue_id, new_entries = outcome.new_entries.len(), "poll tick merged");
                }
                PollStatus::Unauthenticated => {
                    warn!(venue_id, "venue chat poll not authenticated");
                }
                PollStatus::Coalesced => {}
            },
            Err(SessionError::Closed) => break,
            Err(e) => {
                warn!(venue_id, error = %e, "venue chat poll failed");
            }
        }
    }

    info!(venue_id, "venue chat poller stopped");
}
