// vecu - virtual diagnostic ECU launcher
// Seeded or dataset-driven UDS responses served over TCP, ISO-TP or local sockets

// Module declarations
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod logging;
pub mod overrides;
pub mod schema;
pub mod transport;
pub mod uds;

// Re-exports for convenience
pub use error::{ErrorCategory, ErrorCode, LaunchError};
pub use launcher::{launch, launch_with, shutdown_channel, LaunchPlan, Shutdown, ShutdownTrigger};
