/// Venue Chat Types
///
/// Wire-level records exchanged with the venue chat server, plus the
/// identifier aliases shared by every crate in the workspace.

pub mod api;
pub mod models;
