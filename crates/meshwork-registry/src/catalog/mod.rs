//! Action and event catalogs: indexes from a dotted name to the endpoints
//! implementing it.

mod actions;
mod events;
mod wildcard;

pub use actions::{ActionCatalog, ActionEndpointList};
pub use events::{EventCatalog, EventEndpointList};
pub use wildcard::{match_pattern, names_match};
