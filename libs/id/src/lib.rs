//! # coldwatch-id
//!
//! Identifiers for the devices tracked by the coldwatch fleet monitor.
//!
//! ## Design Principles
//!
//! - A device ID is assigned when the fleet is configured and never changes
//! - IDs are opaque: nothing is derived from their contents
//! - Parsing is strict so an ID is always safe to use as a URL path segment
//! - IDs support roundtrip serialization (parse → format → parse)
//!
//! Examples of valid IDs: `box_01`, `cold-room.A3`, `unit42`.

mod error;
mod types;

pub use error::IdError;
pub use types::*;
