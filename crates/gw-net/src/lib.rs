//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Live snapshot surfaces for dashboard clients."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
pub mod rest;
pub mod websocket;

pub use rest::{HealthResponse, SnapshotApiBuilder, SnapshotApiHandle, TopicDescriptor, TopicSummary};
pub use websocket::TopicFilter;
