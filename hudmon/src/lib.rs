//! Library interface for the hudmon viewer: the tolerant wire types, the
//! client-side rolling timeline, and the WebSocket helpers.

pub mod history;
pub mod types;
pub mod ws;
