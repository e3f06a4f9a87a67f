//! Downstream HTTP collaborators: the dump-server registry and the
//! action tracker.

pub mod dump_server;
pub mod tracker;

pub use dump_server::DumpServerClient;
pub use tracker::{ActionStatus, ActionTracker, HttpActionTracker};
