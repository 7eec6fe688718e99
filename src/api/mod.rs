//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod event_bus;
mod logging;
mod options;
mod wiring;

pub use client::NodeStopped;
pub use client::RaftClient;
pub use event_bus::RaftElectionState;
pub use event_bus::RaftEvent;
pub use event_bus::RaftEventListener;
pub use logging::discard_logger;
pub use logging::file_logger;
pub use logging::stdout_logger;
pub use options::RaftOptions;
pub use wiring::RaftNode;
pub use wiring::RaftNodeConfig;
pub use wiring::RaftNodeCreationError;
