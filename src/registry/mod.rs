//! In-memory session and room membership tracking.

mod connections;

pub use connections::{ConnectionRegistry, SessionHandle};
