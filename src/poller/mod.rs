mod publisher;
mod queue;
mod timer;
mod worker;

pub use queue::{PollError, PollQuery, PollQueue, PollResult, PollTable, QueueError};
pub use timer::{PollTimer, RealTimer};

pub(crate) use publisher::Publisher;
pub(crate) use worker::poll_worker;
