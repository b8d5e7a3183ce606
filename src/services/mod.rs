//! Typed service layers over the connection.
//!
//! Services are thin command wrappers: each method issues a single
//! request on a well-known service path and translates the response (or
//! subscription frames) into domain types.

pub mod browse;
pub mod transport;

pub use browse::{BrowseOpts, BrowseService, LoadOpts};
pub use transport::{OutputEvent, QueueEvent, TransportService, ZoneEvent};
