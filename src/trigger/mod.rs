//! Manual trigger entry point: the HTTP page that dispenses a chosen container.

pub mod http;

pub use http::{Reply, Route, TriggerError, TriggerServer, handle, route};
