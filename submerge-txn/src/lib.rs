//! Request tables and quorum coordination (§4.C, §4.E): the bookkeeping a
//! node keeps for reads and updates it is coordinating, independent of the
//! membership state machine and the message loop that drive it.

pub mod coordinator;
pub mod tables;

pub use coordinator::Coordinator;
pub use tables::{ReadRequestStatus, RequestTables, TableKind, TimedOut, VoteOutcome, WriteRequestStatus};
