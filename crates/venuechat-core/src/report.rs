/// Session reporting side channel.
///
/// Conditions that do not fail an operation but that someone should hear
/// about (dropped records, transport hiccups, coalesced polls) are handed to
/// a [`SessionReporter`] instead of being folded into return values.

use std::fmt;
use std::sync::Mutex;

use uuid::Uuid;
use venuechat_types::models::{EntryId, VenueId};

use crate::error::ParseError;

/// One reported condition, tagged with the session that saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub venue_id: VenueId,
    pub session_id: Uuid,
    pub event: ReportEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    /// A record could not be parsed and was dropped.
    RecordRejected {
        entry_id: Option<EntryId>,
        error: ParseError,
    },
    /// A record's timestamp did not parse; it waits in purgatory.
    ParkedInPurgatory {
        entry_id: EntryId,
        raw_timestamp: String,
    },
    /// A purgatory record parsed on a later attempt and was merged.
    PurgatoryResolved {
        entry_id: EntryId,
        attempts: u32,
    },
    /// A purgatory record used up its attempts and was dropped.
    PurgatoryExhausted {
        entry_id: EntryId,
        attempts: u32,
        error: ParseError,
    },
    /// Fetch or submit failed in transit; nothing was merged.
    TransportFailed {
        operation: &'static str,
        message: String,
    },
    /// Fetch or submit was refused for lack of authentication.
    Unauthenticated {
        operation: &'static str,
    },
    /// A poll arrived while another was in flight and was ignored.
    PollCoalesced,
    /// A fetch or submit completed after the session was closed.
    CompletedAfterClose {
        operation: &'static str,
    },
}

impl fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordRejected { entry_id: Some(id), error } => {
                write!(f, "record_rejected id={} error={}", id, error)
            }
            Self::RecordRejected { entry_id: None, error } => {
                write!(f, "record_rejected id=? error={}", error)
            }
            Self::ParkedInPurgatory { entry_id, raw_timestamp } => {
                write!(f, "purgatory_parked id={} created_at={:?}", entry_id, raw_timestamp)
            }
            Self::PurgatoryResolved { entry_id, attempts } => {
                write!(f, "purgatory_resolved id={} attempts={}", entry_id, attempts)
            }
            Self::PurgatoryExhausted { entry_id, attempts, error } => {
                write!(f, "purgatory_exhausted id={} attempts={} error={}", entry_id, attempts, error)
            }
            Self::TransportFailed { operation, message } => {
                write!(f, "transport_failed op={} error={}", operation, message)
            }
            Self::Unauthenticated { operation } => {
                write!(f, "unauthenticated op={}", operation)
            }
            Self::PollCoalesced => write!(f, "poll_coalesced"),
            Self::CompletedAfterClose { operation } => {
                write!(f, "completed_after_close op={}", operation)
            }
        }
    }
}

pub trait SessionReporter: Send + Sync {
    fn report(&self, report: SessionReport);
}

/// Reporter that writes through `tracing`.
pub struct TracingReporter;

impl SessionReporter for TracingReporter {
    fn report(&self, report: SessionReport) {
        let session_id = report.session_id.to_string();
        match &report.event {
            ReportEvent::RecordRejected { .. }
            | ReportEvent::PurgatoryExhausted { .. }
            | ReportEvent::TransportFailed { .. } => {
                tracing::warn!(
                    venue_id = report.venue_id,
                    session_id = %session_id,
                    "{}",
                    report.event,
                );
            }
            ReportEvent::ParkedInPurgatory { .. }
            | ReportEvent::PurgatoryResolved { .. }
            | ReportEvent::Unauthenticated { .. } => {
                tracing::info!(
                    venue_id = report.venue_id,
                    session_id = %session_id,
                    "{}",
                    report.event,
                );
            }
            ReportEvent::PollCoalesced | ReportEvent::CompletedAfterClose { .. } => {
                tracing::debug!(
                    venue_id = report.venue_id,
                    session_id = %session_id,
                    "{}",
                    report.event,
                );
            }
        }
    }
}

/// Discards everything.
pub struct NullReporter;

impl SessionReporter for NullReporter {
    fn report(&self, _report: SessionReport) {}
}

/// Keeps every report in memory, in order.
#[derive(Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<SessionReport>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<SessionReport> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.reports().into_iter().map(|r| r.event).collect()
    }
}

impl SessionReporter for CollectingReporter {
    fn report(&self, report: SessionReport) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report);
    }
}
