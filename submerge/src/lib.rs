//! Ties the ring, storage, and quorum-coordination crates together into a
//! running node: the membership state machine and the single-threaded
//! message loop that drives it (§4.D, §4.F).

pub mod dispatcher;
pub mod membership;

pub use dispatcher::NodeActor;
pub use membership::{NodeState, StartupCommand};
