//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "reqwest client for append, filter and download endpoints."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use gw_common::RelayConfig;
use gw_ingest::{PersistenceSink, RelayError};
use reqwest::{Client, Response};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::history::HistoryEntry;
use crate::{BackendError, Result};

const APPEND_PATH: &str = "gear_value_view/";
const FILTER_PATH: &str = "filter_gear_value/";
const DOWNLOAD_PATH: &str = "download_gear_value/";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base: Url,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut normalized = base_url.trim().to_owned();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized)
            .map_err(|err| BackendError::InvalidUrl(format!("{base_url}: {err}")))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::new(&config.base_url, config.timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| BackendError::InvalidUrl(format!("{path}: {err}")))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// `POST /gear_value_view/` with `{"value": value}`.
    pub async fn append(&self, value: &str) -> Result<()> {
        let url = self.endpoint(APPEND_PATH)?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "value": value }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `GET /filter_gear_value/?from_date=..&to_date=..`, dates inclusive.
    pub async fn filter(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<HistoryEntry>> {
        let url = self.endpoint(FILTER_PATH)?;
        let from_date = from.format(DATE_FORMAT).to_string();
        let to_date = to.format(DATE_FORMAT).to_string();
        debug!(%from_date, %to_date, "querying gear value history");
        let response = self
            .http
            .get(url)
            .query(&[("from_date", from_date), ("to_date", to_date)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `GET /download_gear_value/` as CSV text.
    pub async fn download_csv(&self) -> Result<String> {
        let url = self.endpoint(DOWNLOAD_PATH)?;
        let response = self.http.get(url).send().await?;
        Ok(Self::check(response).await?.text().await?)
    }
}

#[async_trait]
impl PersistenceSink for BackendClient {
    async fn append(&self, value: &str) -> std::result::Result<(), RelayError> {
        BackendClient::append(self, value).await.map_err(|err| match err {
            BackendError::Status { status, .. } => RelayError::Status { status },
            other => RelayError::Request(other.to_string()),
        })
    }
}
