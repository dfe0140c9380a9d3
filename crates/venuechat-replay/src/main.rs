mod transcript;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing::{info, warn};

use venuechat_core::{
    ChatConfig, Clock, CollectingReporter, ManualClock, SessionReport, SessionReporter,
    TracingReporter, VenueChatSession,
};

use crate::transcript::{Step, Transcript};

/// Logs every report and keeps a copy for the summary.
struct ReplayReporter {
    collected: CollectingReporter,
}

impl SessionReporter for ReplayReporter {
    fn report(&self, report: SessionReport) {
        TracingReporter.report(report.clone());
        self.collected.report(report);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "venuechat=debug,venuechat_core=debug,venuechat_replay=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VENUECHAT_TRANSCRIPT").ok())
        .context("usage: venuechat-replay <transcript.json> (or set VENUECHAT_TRANSCRIPT)")?
        .into();
    let config = ChatConfig::from_env()?;

    let transcript = Transcript::load(&path)?;
    info!(
        venue_id = transcript.venue_id,
        steps = transcript.steps.len(),
        "replaying {}",
        path.display()
    );

    let clock = Arc::new(ManualClock::new(transcript.now.unwrap_or_else(chrono::Utc::now)));
    let reporter = Arc::new(ReplayReporter {
        collected: CollectingReporter::new(),
    });
    let session = VenueChatSession::builder(transcript.venue_id, Arc::new(transcript.backend()))
        .config(config)
        .clock(clock.clone())
        .reporter(reporter.clone())
        .build()?;

    for (index, step) in transcript.steps.into_iter().enumerate() {
        match step {
            Step::Poll { .. } => match session.poll().await {
                Ok(outcome) => info!(
                    step = index,
                    status = ?outcome.status,
                    new_entries = outcome.new_entries.len(),
                    last_seen_id = session.last_seen_id(),
                    "poll"
                ),
                Err(e) => warn!(step = index, error = %e, "poll failed"),
            },
            Step::Submit { body, kind, .. } => match session.submit(body, kind).await {
                Ok(appended) => info!(step = index, appended = appended.len(), "submit"),
                Err(e) => warn!(step = index, error = %e, "submit failed"),
            },
            Step::PlusOne {
                entry_id,
                actor_id,
                metadata,
            } => {
                let applied = session.apply_plus_one(entry_id, actor_id, metadata);
                info!(step = index, entry_id, actor_id, applied, "plus-one");
            }
            Step::Advance { seconds } => {
                clock.advance(chrono::Duration::seconds(seconds));
                info!(step = index, now = %clock.now(), "clock advanced");
            }
        }
    }

    let summary = json!({
        "venue_id": session.venue_id(),
        "has_loaded": session.has_loaded(),
        "last_seen_id": session.last_seen_id(),
        "active_chatters": session.active_chatter_count(),
        "purgatory": session.purgatory_len(),
        "entries": session.entries(),
        "reports": reporter
            .collected
            .events()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
    });
    session.close();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
