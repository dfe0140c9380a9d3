/// Venue chat synchronization engine.
///
/// A [`VenueChatSession`] keeps the local log of one venue's chat in step
/// with the server:
/// - cursor-based polling, merging only ids above the last one seen
/// - duplicate-free, append-only log in ascending id order
/// - purgatory for records whose timestamp fails to parse, with bounded retries
/// - rolling-window count of active chatters
/// - love/review entries with mergeable plus-ones
///
/// Transport and authentication live behind [`ChatBackend`].

pub mod backend;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod events;
pub mod merge;
pub mod poller;
pub mod report;
pub mod scripted;
pub mod session;
pub mod timestamp;

// Re-export key types for convenience.
pub use backend::ChatBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChatConfig;
pub use entry::{ChatEntry, EntryHeader, LoveChatEntry, PlusOneMetadata};
pub use error::{BackendError, ConfigError, ParseError, SessionError};
pub use events::SessionEvent;
pub use merge::{ChatLog, MergeOutcome, MergeRules, count_active_chatters};
pub use poller::{run_poll_loop, spawn_poller};
pub use report::{
    CollectingReporter, NullReporter, ReportEvent, SessionReport, SessionReporter, TracingReporter,
};
pub use scripted::ScriptedBackend;
pub use session::{PollOutcome, PollStatus, SessionBuilder, VenueChatSession};
pub use timestamp::ChatTimestampFormatter;
