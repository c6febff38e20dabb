//! Catalog model, catalog resolution and the playback session state machine
//! shared by the PKRK FM daemon and its clients.

pub mod catalog;
pub mod cdn;
pub mod config;
pub mod fallback;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod store;
