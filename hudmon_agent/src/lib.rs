//! Library interface for the hudmon agent: metric sources, snapshot
//! assembly, the history ring and broadcast hub, the sampler, and the
//! HTTP/WebSocket surface.

pub mod assembler;
pub mod config;
pub mod format;
pub mod gpu;
pub mod history;
pub mod hub;
pub mod metrics;
pub mod reading;
pub mod sampler;
pub mod state;
pub mod types;
pub mod ws;

pub use assembler::{Assembler, AssemblyError};
pub use config::AgentConfig;
pub use hub::{BroadcastHub, ViewerSession};
pub use state::AppState;
pub use types::Snapshot;
pub use ws::router;
