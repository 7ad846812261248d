//! Zenoh side of the bridge: publishes readings and status, serves writes.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use zenoh::Session;
use zenoh::sample::SampleKind;

use fieldbus_common::serialization::{Format, encode};
use fieldbus_common::{KeyExprBuilder, Reading};

use crate::config::FieldbusConfig;
use crate::fixture;
use crate::function::WriteValue;
use crate::module::FieldbusModule;
use crate::transport::WriteAck;
use crate::writer::WriteError;

/// Outcome published for every write request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub label: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<WriteAck>,
}

impl WriteOutcome {
    pub fn from_result(label: &str, result: Result<WriteAck, WriteError>) -> Self {
        match result {
            Ok(ack) => Self {
                label: label.to_string(),
                ok: true,
                error: None,
                ack: Some(ack),
            },
            Err(e) => Self::failed(label, e.to_string()),
        }
    }

    pub fn failed(label: &str, error: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            ok: false,
            error: Some(error.into()),
            ack: None,
        }
    }
}

/// Parse a write payload: a JSON number or an array of numbers.
pub fn parse_write_payload(payload: &[u8]) -> Result<WriteValue, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Status document published at `<prefix>/@/status`.
pub fn status_document(
    buses: &[String],
    connected: &[String],
    status: &str,
) -> serde_json::Value {
    serde_json::json!({
        "bridge": "fieldbus",
        "version": env!("CARGO_PKG_VERSION"),
        "buses": buses,
        "connected": connected,
        "status": status,
    })
}

/// Connects a [`FieldbusModule`] to a Zenoh session.
pub struct Bridge {
    session: Session,
    module: Arc<FieldbusModule>,
    keys: KeyExprBuilder,
    format: Format,
    poll_interval: Duration,
    fixture: Option<PathBuf>,
}

impl Bridge {
    pub fn new(session: Session, module: Arc<FieldbusModule>, config: &FieldbusConfig) -> Self {
        Self {
            session,
            module,
            keys: KeyExprBuilder::new(config.key_prefix.as_str()),
            format: config.serialization,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            fixture: config
                .development
                .as_ref()
                .map(|development| development.fixture.clone()),
        }
    }

    pub async fn publish_status(&self, status: &str) {
        let key = self.keys.status_key();
        let connected = self.module.connected_buses().await;
        let document = status_document(&self.module.bus_names(), &connected, status);
        if let Err(e) = self.session.put(&key, document.to_string()).await {
            error!("Failed to publish bridge status: {}", e);
        }
    }

    /// Run one cycle and publish its readings. Returns the number published.
    pub async fn poll_once(&self) -> usize {
        let readings = match &self.fixture {
            Some(path) => match fixture::load_fixture(path) {
                Ok(readings) => readings,
                Err(e) => {
                    error!("Failed to load fixture {:?}: {}", path, e);
                    return 0;
                }
            },
            None => match self.module.read().await {
                Some(readings) => readings,
                None => return 0,
            },
        };

        let mut published = 0;
        for reading in &readings {
            if self.publish_reading(reading).await {
                published += 1;
            }
        }
        published
    }

    async fn publish_reading(&self, reading: &Reading) -> bool {
        let key = self.keys.reading(&reading.label);
        let payload = match encode(reading, self.format) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode reading '{}': {}", reading.label, e);
                return false;
            }
        };

        match self.session.put(&key, payload).await {
            Ok(()) => {
                debug!("Published: {} = {:?}", key, reading.outcome);
                true
            }
            Err(e) => {
                warn!("Failed to publish to '{}': {}", key, e);
                false
            }
        }
    }

    /// Poll forever at the configured interval.
    pub async fn run_poller(self: Arc<Self>) {
        info!(
            "Starting poll loop (interval: {} ms, prefix: '{}')",
            self.poll_interval.as_millis(),
            self.keys.prefix()
        );

        loop {
            let count = self.poll_once().await;
            debug!(
                "Poll cycle published {} reading(s), errors: {}",
                count,
                self.module.errors()
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Serve write requests until the subscriber closes.
    pub async fn run_writer(self: Arc<Self>) -> fieldbus_common::Result<()> {
        let key_expr = self.keys.write_wildcard();
        info!(key_expr = %key_expr, "Listening for write requests");

        let subscriber = self.session.declare_subscriber(&key_expr).await?;

        loop {
            match subscriber.recv_async().await {
                Ok(sample) => {
                    if sample.kind() == SampleKind::Delete {
                        continue;
                    }
                    let key = sample.key_expr().as_str().to_string();
                    let payload = sample.payload().to_bytes();
                    self.handle_write(&key, &payload).await;
                }
                Err(e) => {
                    warn!("Write subscriber closed: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_write(&self, key: &str, payload: &[u8]) {
        let Some(label) = self.keys.label_from_write_key(key) else {
            debug!(key = %key, "Ignoring write on unexpected key");
            return;
        };

        let outcome = match parse_write_payload(payload) {
            Ok(value) => WriteOutcome::from_result(label, self.module.write(label, value).await),
            Err(e) => WriteOutcome::failed(label, format!("Invalid write payload: {}", e)),
        };

        if outcome.ok {
            info!(label = %label, "Write to '{}' succeeded", label);
        }

        let result_key = self.keys.write_result_key(label);
        match encode(&outcome, self.format) {
            Ok(bytes) => {
                if let Err(e) = self.session.put(&result_key, bytes).await {
                    warn!("Failed to publish write result to '{}': {}", result_key, e);
                }
            }
            Err(e) => warn!("Failed to encode write result: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{WriteFunction, WriteValue};

    #[test]
    fn test_parse_write_payload() {
        assert_eq!(parse_write_payload(b"1").unwrap(), WriteValue::Scalar(1.0));
        assert_eq!(
            parse_write_payload(b"[1, 2.5]").unwrap(),
            WriteValue::Sequence(vec![1.0, 2.5])
        );
        assert!(parse_write_payload(b"\"on\"").is_err());
    }

    #[test]
    fn test_outcome_success_json() {
        let outcome = WriteOutcome::from_result(
            "valve1",
            Ok(WriteAck {
                function: WriteFunction::WriteCoil,
                address: 10,
                count: 1,
            }),
        );
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["ok"], true);
        assert_eq!(json["ack"]["function"], "writeCoil");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_outcome_failure_json() {
        let outcome =
            WriteOutcome::from_result("nope", Err(WriteError::NotFound("nope".to_string())));
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "No output is labeled 'nope'");
        assert!(json.get("ack").is_none());
    }

    #[test]
    fn test_status_document() {
        let status = status_document(
            &["A".to_string(), "B".to_string()],
            &["B".to_string()],
            "running",
        );
        assert_eq!(status["bridge"], "fieldbus");
        assert_eq!(status["buses"][1], "B");
        assert_eq!(status["connected"], serde_json::json!(["B"]));
        assert_eq!(status["status"], "running");
    }
}
