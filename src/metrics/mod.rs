mod types;

pub mod linux;
pub mod units;
pub mod windows;

pub use types::{
    CpuMetrics, DetailedMetrics, DiskMetrics, HealthCheck, HealthReport, HealthStatus,
    InterfaceInfo, MemoryMetrics, MetricsSnapshot, NetworkMetrics, PartitionInfo, ProcessInfo,
    SystemInfo,
};

use thiserror::Error;

use crate::services::logger::Logger;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("missing {0} in command output")]
    Missing(&'static str),
    #[error("could not parse number from '{0}'")]
    Number(String),
    #[error("unexpected output layout: {0}")]
    Layout(&'static str),
}

pub fn field_or_default<T: Default>(
    result: Result<T, ParseError>,
    logger: &Logger,
    field: &'static str,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            logger.debug(
                &format!("Falling back to default for {}: {}", field, err),
                None,
            );
            T::default()
        }
    }
}

pub(crate) fn required_output<'a>(
    raw: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, ParseError> {
    raw.as_deref().ok_or(ParseError::Missing(field))
}
