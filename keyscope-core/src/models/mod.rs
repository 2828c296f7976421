pub mod envelope;
pub mod event;

pub use envelope::{Envelope, LiveStatus, StatsSnapshot};
pub use event::{ChangeEvent, Operation};
