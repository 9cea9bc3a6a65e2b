//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Persistence and history query client for the gear value API."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
pub mod client;
pub mod history;

/// Shared result type for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

pub use client::BackendClient;
pub use history::{parse_reading, parse_readings, HistoryEntry, HistoryStats};
