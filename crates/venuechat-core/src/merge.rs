use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use venuechat_types::api::RawChatRecord;
use venuechat_types::models::EntryId;

use crate::entry::ChatEntry;
use crate::error::ParseError;
use crate::report::ReportEvent;
use crate::timestamp::ChatTimestampFormatter;

/// A record parked because its timestamp did not parse.
#[derive(Debug, Clone)]
struct PurgatoryEntry {
    id: EntryId,
    raw: RawChatRecord,
    attempts: u32,
}

/// Knobs for one merge.
pub struct MergeRules {
    pub formatter: ChatTimestampFormatter,
    pub max_attempts: u32,
    /// Give parked records another parse attempt. Poll cycles do, submit
    /// confirmations do not, so attempts count poll cycles.
    pub retry_purgatory: bool,
    pub now: DateTime<Utc>,
    pub window: Duration,
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Exactly what was appended, in append order.
    pub appended: Vec<ChatEntry>,
    pub reports: Vec<ReportEvent>,
}

/// The ordered, duplicate-free chat log of one venue plus its merge cursor
/// and purgatory.
///
/// Entries are only ever appended. Each merge appends what it accepted in
/// ascending id order and moves `last_seen_id` to the highest id merged.
///
/// Parking a record does not hold the cursor back. As soon as a higher id
/// merges, even from the same batch, the cursor passes the parked id and a
/// fetch from that cursor no longer returns it. A copy that does arrive
/// replaces the parked one. A parked record that resolves late is appended
/// after higher ids, so the log is in id order within each merge but not
/// across merges.
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
    last_seen_id: EntryId,
    purgatory: Vec<PurgatoryEntry>,
    active_chatter_count: usize,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn last_seen_id(&self) -> EntryId {
        self.last_seen_id
    }

    pub fn active_chatter_count(&self) -> usize {
        self.active_chatter_count
    }

    pub fn purgatory_len(&self) -> usize {
        self.purgatory.len()
    }

    pub fn purgatory_ids(&self) -> Vec<EntryId> {
        self.purgatory.iter().map(|p| p.id).collect()
    }

    pub fn entry(&self, id: EntryId) -> Option<&ChatEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut ChatEntry> {
        self.entries.iter_mut().find(|e| e.id() == id)
    }

    pub fn merge(&mut self, records: Vec<Value>, rules: &MergeRules) -> MergeOutcome {
        let mut reports = Vec::new();
        let mut accepted = Vec::new();
        let mut candidates = Vec::new();
        let mut batch_ids = HashSet::new();

        for value in records {
            let raw = match RawChatRecord::deserialize(&value) {
                Ok(raw) => raw,
                Err(e) => {
                    reports.push(ReportEvent::RecordRejected {
                        entry_id: value.get("id").and_then(Value::as_i64),
                        error: ParseError::malformed(e),
                    });
                    continue;
                }
            };

            if let Some(id) = raw.id {
                if let Some(parked) = self.purgatory.iter_mut().find(|p| p.id == id) {
                    debug!(entry_id = id, "re-delivered record replaces purgatory copy");
                    parked.raw = raw;
                    continue;
                }
                if id <= self.last_seen_id || !batch_ids.insert(id) {
                    debug!(entry_id = id, last_seen_id = self.last_seen_id, "dropping duplicate record");
                    continue;
                }
            }

            candidates.push(raw);
        }

        if rules.retry_purgatory {
            self.retry_purgatory(rules, &mut accepted, &mut reports);
        }

        for raw in candidates {
            let candidate_id = raw.id;
            match ChatEntry::parse(&raw, &rules.formatter) {
                Ok(entry) => accepted.push(entry),
                Err(error) if error.is_retryable() => match candidate_id {
                    Some(id) if rules.max_attempts > 1 => {
                        reports.push(ReportEvent::ParkedInPurgatory {
                            entry_id: id,
                            raw_timestamp: raw.created_at.clone().unwrap_or_default(),
                        });
                        self.purgatory.push(PurgatoryEntry { id, raw, attempts: 1 });
                    }
                    Some(id) => reports.push(ReportEvent::PurgatoryExhausted {
                        entry_id: id,
                        attempts: 1,
                        error,
                    }),
                    None => reports.push(ReportEvent::RecordRejected { entry_id: None, error }),
                },
                Err(error) => reports.push(ReportEvent::RecordRejected {
                    entry_id: candidate_id,
                    error,
                }),
            }
        }

        accepted.sort_by_key(ChatEntry::id);
        if let Some(max_id) = accepted.iter().map(ChatEntry::id).max() {
            self.last_seen_id = self.last_seen_id.max(max_id);
        }
        self.entries.extend(accepted.iter().cloned());
        self.recount_active_chatters(rules.now, rules.window);

        MergeOutcome {
            appended: accepted,
            reports,
        }
    }

    fn retry_purgatory(
        &mut self,
        rules: &MergeRules,
        accepted: &mut Vec<ChatEntry>,
        reports: &mut Vec<ReportEvent>,
    ) {
        for mut parked in std::mem::take(&mut self.purgatory) {
            parked.attempts += 1;
            match ChatEntry::parse(&parked.raw, &rules.formatter) {
                Ok(entry) => {
                    reports.push(ReportEvent::PurgatoryResolved {
                        entry_id: parked.id,
                        attempts: parked.attempts,
                    });
                    accepted.push(entry);
                }
                Err(error) if error.is_retryable() => {
                    if parked.attempts >= rules.max_attempts {
                        reports.push(ReportEvent::PurgatoryExhausted {
                            entry_id: parked.id,
                            attempts: parked.attempts,
                            error,
                        });
                    } else {
                        self.purgatory.push(parked);
                    }
                }
                Err(error) => reports.push(ReportEvent::RecordRejected {
                    entry_id: Some(parked.id),
                    error,
                }),
            }
        }
    }

    pub fn recount_active_chatters(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.active_chatter_count = count_active_chatters(&self.entries, now, window);
        self.active_chatter_count
    }
}

/// Distinct authors with an entry created within `[now - window, now]`.
pub fn count_active_chatters(entries: &[ChatEntry], now: DateTime<Utc>, window: Duration) -> usize {
    let since = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    entries
        .iter()
        .filter(|e| e.created_at() >= since && e.created_at() <= now)
        .map(ChatEntry::author_id)
        .collect::<HashSet<_>>()
        .len()
}
