//! Anonymous usage records and where they are sent.

use std::{cell::RefCell, rc::Rc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{config::MetricsConfig, error::MetricsError};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// only enumerated values are ever part of a record. Source urls,
/// credentials, and the CIDR block itself are never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricRecord {
    pub solution: String,
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub time_stamp: String,
    pub version: String,
    pub data: MetricData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricData {
    #[serde(rename = "Type")]
    pub input_type: String,
    /// Yes/No: whether the input is restricted to a CIDR block
    pub cidr: String,
    pub encoding_profile: String,
    pub channel_start: String,
    pub request_type: String,
}

impl MetricRecord {
    pub fn now(solution: &str, uuid: &str, version: &str, data: MetricData) -> Self {
        Self {
            solution: solution.to_string(),
            uuid: uuid.to_string(),
            time_stamp: chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            version: version.to_string(),
            data,
        }
    }
}

pub trait MetricsSink {
    fn send(&self, record: &MetricRecord) -> Result<(), MetricsError>;
}

/// posts each record as JSON to the metrics endpoint
pub struct HttpMetricsSink {
    pub endpoint: String,
    pub timeout: Duration,
}

impl HttpMetricsSink {
    pub fn new(conf: &MetricsConfig) -> Self {
        Self {
            endpoint: conf.endpoint.clone(),
            timeout: Duration::from_secs(conf.timeout_seconds),
        }
    }
}

impl MetricsSink for HttpMetricsSink {
    fn send(&self, record: &MetricRecord) -> Result<(), MetricsError> {
        tracing::debug!(endpoint = %self.endpoint, "sending anonymous metric");
        match ureq::post(&self.endpoint).timeout(self.timeout).send_json(record) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(MetricsError::Rejected(format!("status {code}"))),
            Err(e) => Err(MetricsError::Http(e.to_string())),
        }
    }
}

/// keeps every record in memory. Clones share the same records,
/// so a clone can be kept to inspect what a handler sent.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricsSink {
    records: Rc<RefCell<Vec<MetricRecord>>>,
}

impl MemoryMetricsSink {
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.borrow().clone()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn send(&self, record: &MetricRecord) -> Result<(), MetricsError> {
        self.records.borrow_mut().push(record.clone());
        Ok(())
    }
}
