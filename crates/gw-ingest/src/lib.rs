//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Ingestion pipeline from raw broker frames to published snapshots."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
pub mod events;
pub mod pipeline;
pub mod publisher;
pub mod relay;
pub mod service;
pub mod store;

pub use events::{EventLog, EventLogEntry, EventLogExtractor};
pub use pipeline::{split_lines, LineParser, ParsedFrame, Pipeline, TopicPolicy};
pub use publisher::{Snapshot, SnapshotPublisher, SnapshotSubscriber};
pub use relay::{relay_value, PersistenceSink, Relay, RelayDispatch, RelayError, RelayFailure};
pub use service::IngestService;
pub use store::{BufferSnapshot, BufferStore, SharedBuffer, TopicBuffer};
