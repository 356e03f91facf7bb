//! OBD-II Round-Robin Poller
//!
//! Queries a connected vehicle once to find which supported commands actually
//! answer, then cycles through that working set one query per call.

mod poller;

pub use poller::{PollError, PollerConfig, RoundRobinPoller, WorkingSet};
