//! Poll scheduler.
//!
//! Buses are polled concurrently; groups within one bus run strictly in
//! declaration order on the shared transport, paced by `read_delay`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use fieldbus_common::Reading;

use crate::codec::{self, DecodeError};
use crate::config::InputGroup;
use crate::registry::{BusHandle, BusRegistry};
use crate::state::StateGate;

/// Decimal places kept in published values.
pub const VALUE_PRECISION: u32 = 2;

/// Message reported for groups left unread after the link dropped mid-cycle.
pub const CONNECTION_LOST: &str = "connection lost";

/// Message reported for fields that decode to NaN or overflow when scaled.
pub const NON_FINITE: &str = "non-finite value";

/// One error reading per reported field of `group`.
pub fn fan_out_error(group: &InputGroup, message: &str) -> Vec<Reading> {
    group
        .active_fields()
        .into_iter()
        .map(|spec| Reading::error(spec.label.as_str(), spec.unit.as_str(), message))
        .collect()
}

/// Decode a raw payload into scaled, rounded readings.
///
/// A field whose scaled value is not finite becomes an error reading.
pub fn decode_group(group: &InputGroup, raw: &[u8]) -> Result<Vec<Reading>, DecodeError> {
    let values = codec::decode(&group.layout, raw)?;

    Ok(values
        .into_iter()
        .filter_map(|(key, value)| {
            let spec = group.fields.get(key)?;
            if spec.is_unused() {
                return None;
            }
            let scaled = codec::round_to(value * spec.scale, VALUE_PRECISION);
            if !scaled.is_finite() {
                return Some(Reading::error(
                    spec.label.as_str(),
                    spec.unit.as_str(),
                    NON_FINITE,
                ));
            }
            Some(Reading::value(spec.label.as_str(), spec.unit.as_str(), scaled))
        })
        .collect())
}

fn labels(group: &InputGroup) -> Vec<&str> {
    group
        .active_fields()
        .into_iter()
        .map(|spec| spec.label.as_str())
        .collect()
}

/// Poll every input group of one bus.
///
/// A bus that cannot be connected yields nothing.
pub async fn poll_bus(bus: &BusHandle, gate: &StateGate) -> Vec<Reading> {
    let mut readings = Vec::new();
    if !bus.is_enabled() || bus.inputs().is_empty() {
        return readings;
    }

    let mut link = bus.acquire().await;
    if link.is_none() {
        debug!(bus = %bus.name(), "Skipping bus '{}': not connected", bus.name());
        return readings;
    }

    let read_delay = Duration::from_millis(bus.config().read_delay);

    for (index, group) in bus.inputs().iter().enumerate() {
        let Some(transport) = link.as_mut() else {
            readings.extend(fan_out_error(group, CONNECTION_LOST));
            gate.record_errors();
            continue;
        };

        if index > 0 {
            tokio::time::sleep(read_delay).await;
        }

        let request = group.read_request();
        match transport.read(request).await {
            Ok(raw) => match decode_group(group, &raw) {
                Ok(values) => {
                    if values.iter().any(Reading::is_error) {
                        warn!(
                            bus = %bus.name(),
                            raw = %codec::hex(&raw),
                            "Bus '{}' {}: {}",
                            bus.name(),
                            group.describe(),
                            NON_FINITE
                        );
                        gate.record_errors();
                    }
                    readings.extend(values);
                }
                Err(e) => {
                    error!(
                        bus = %bus.name(),
                        slave = group.slave_id,
                        address = group.start_address,
                        count = group.count,
                        raw = %codec::hex(&raw),
                        "Bus '{}' {}: {}",
                        bus.name(),
                        group.describe(),
                        e
                    );
                    gate.record_errors();
                }
            },
            Err(e) => {
                debug!(
                    bus = %bus.name(),
                    slave = group.slave_id,
                    address = group.start_address,
                    count = group.count,
                    fc = request.function.code(),
                    labels = ?labels(group),
                    "Read failed on bus '{}' ({}): {}",
                    bus.name(),
                    request,
                    e
                );
                readings.extend(fan_out_error(group, &e.to_string()));
                gate.record_errors();
                bus.discard_on_failure(&mut link, &e);
            }
        }
    }

    readings
}

/// Poll all enabled buses. Results follow bus declaration order.
pub async fn poll_buses(registry: &BusRegistry, gate: &StateGate) -> Vec<Reading> {
    let tasks: Vec<_> = registry
        .enabled()
        .map(|bus| {
            let bus = Arc::clone(bus);
            let gate = gate.clone();
            tokio::spawn(async move { poll_bus(&bus, &gate).await })
        })
        .collect();

    let mut readings = Vec::new();
    for task in tasks {
        match task.await {
            Ok(bus_readings) => readings.extend(bus_readings),
            Err(e) => {
                error!("Bus poll task failed: {}", e);
                gate.record_errors();
            }
        }
    }
    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, buses};
    use crate::transport::TransportError;

    const TWO_GROUPS: &str = r#"[
        {
            bus: { name: "A", type: "TCP", host: "10.0.0.5", port: 502, read_delay: 50 },
            inputs: [
                {
                    id: 1, add: 100, num: 2, fc: "readHoldingRegisters",
                    format: ">H(temp)",
                    parser: { temp: { label: "temp", unit: "°C", scale: 0.1 } }
                },
                {
                    id: 2, add: 0, num: 3,
                    format: ">hHH(skip)",
                    parser: {
                        "0": { label: "flow", unit: "l/min", scale: 1 },
                        "1": { label: "pressure", unit: "bar", scale: 0.01 },
                        skip: { label: "reserved_none_" }
                    }
                }
            ]
        }
    ]"#;

    async fn ready(json: &str, connector: &MockConnector) -> (BusRegistry, StateGate) {
        let registry = BusRegistry::new(buses(json), Arc::new(connector.clone()));
        registry.connect_all().await;
        let gate = StateGate::new();
        gate.mark_ready();
        (registry, gate)
    }

    #[tokio::test(start_paused = true)]
    async fn test_decodes_and_scales() {
        let connector = MockConnector::new();
        connector
            .bus("A")
            .reply_words(&[235, 0])
            .reply_words(&[0xFFFE, 150, 7]);
        let (registry, gate) = ready(TWO_GROUPS, &connector).await;

        let readings = poll_buses(&registry, &gate).await;

        assert_eq!(
            readings,
            vec![
                Reading::value("temp", "°C", 23.5),
                Reading::value("flow", "l/min", -2.0),
                Reading::value("pressure", "bar", 1.5),
            ]
        );
        assert!(!gate.errors());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_follow_declaration_order_with_pacing() {
        let connector = MockConnector::new();
        let mock = connector.bus("A");
        mock.reply_words(&[1, 0]).reply_words(&[1, 2, 3]);
        let (registry, gate) = ready(TWO_GROUPS, &connector).await;

        poll_buses(&registry, &gate).await;

        let reads = mock.reads();
        assert_eq!(reads.len(), 2);
        assert_eq!((reads[0].slave, reads[0].address, reads[0].count), (1, 100, 2));
        assert_eq!((reads[1].slave, reads[1].address, reads[1].count), (2, 0, 3));

        let times = mock.read_times();
        assert!(times[1] - times[0] >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_fans_out() {
        let connector = MockConnector::new();
        connector
            .bus("A")
            .fail_read(TransportError::Exception("IllegalDataAddress".to_string()))
            .reply_words(&[1, 2, 3]);
        let (registry, gate) = ready(TWO_GROUPS, &connector).await;

        let readings = poll_buses(&registry, &gate).await;

        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].label, "temp");
        assert_eq!(
            readings[0].error_message(),
            Some("Modbus exception: IllegalDataAddress")
        );
        assert_eq!(readings[0].as_value(), None);
        assert_eq!(readings[1].as_value(), Some(1.0));
        assert!(gate.errors());
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_drops_group_only() {
        let connector = MockConnector::new();
        connector
            .bus("A")
            .reply_bytes(&[0x01])
            .reply_words(&[1, 2, 3]);
        let (registry, gate) = ready(TWO_GROUPS, &connector).await;

        let readings = poll_buses(&registry, &gate).await;

        let labels: Vec<&str> = readings.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["flow", "pressure"]);
        assert!(gate.errors());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_fans_out_remaining_groups() {
        let connector = MockConnector::new();
        let mock = connector.bus("A");
        mock.fail_read(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        )));
        let (registry, gate) = ready(TWO_GROUPS, &connector).await;

        let readings = poll_buses(&registry, &gate).await;

        assert_eq!(readings.len(), 3);
        assert_eq!(readings[1].error_message(), Some(CONNECTION_LOST));
        assert_eq!(mock.reads().len(), 1);
        assert!(registry.connected().await.is_empty());

        mock.reply_words(&[235, 0]).reply_words(&[1, 2, 3]);
        let readings = poll_buses(&registry, &gate).await;
        assert_eq!(readings[0].as_value(), Some(23.5));
        assert_eq!(mock.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_bus_is_a_silent_gap() {
        let json = r#"[
            { bus: { name: "down" }, inputs: [ { format: ">H(a)", parser: { a: { label: "a" } } } ] },
            { bus: { name: "up" }, inputs: [ { format: ">H(b)", parser: { b: { label: "b" } } } ] }
        ]"#;
        let connector = MockConnector::new();
        connector.bus("down").refuse_connect();
        connector.bus("up").reply_words(&[7]);
        let (registry, gate) = ready(json, &connector).await;

        let readings = poll_buses(&registry, &gate).await;

        assert_eq!(readings, vec![Reading::value("b", "?", 7.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_bus_not_polled() {
        let json = r#"[
            { bus: { name: "off", enabled: false }, inputs: [ { format: ">H(a)", parser: { a: { label: "a" } } } ] }
        ]"#;
        let connector = MockConnector::new();
        let mock = connector.bus("off");
        let (registry, gate) = ready(json, &connector).await;

        assert!(poll_buses(&registry, &gate).await.is_empty());
        assert_eq!(mock.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_discards_link_and_reconnects() {
        let connector = MockConnector::new();
        let mock = connector.bus("A");
        mock.fail_read(TransportError::Timeout(1000));
        let (registry, gate) = ready(TWO_GROUPS, &connector).await;

        let readings = poll_buses(&registry, &gate).await;

        assert_eq!(readings[0].error_message(), Some("Timed out after 1000 ms"));
        assert_eq!(readings[1].error_message(), Some(CONNECTION_LOST));
        assert_eq!(readings[2].error_message(), Some(CONNECTION_LOST));
        assert_eq!(mock.reads().len(), 1);
        assert!(registry.connected().await.is_empty());

        mock.reply_words(&[235, 0]).reply_words(&[1, 2, 3]);
        let readings = poll_buses(&registry, &gate).await;
        assert_eq!(mock.connects(), 2);
        assert_eq!(readings[0].as_value(), Some(23.5));
        assert_eq!(readings[2].as_value(), Some(0.02));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exception_keeps_link() {
        let connector = MockConnector::new();
        let mock = connector.bus("A");
        mock.fail_read(TransportError::Exception("IllegalDataAddress".to_string()))
            .reply_words(&[1, 2, 3]);
        let (registry, gate) = ready(TWO_GROUPS, &connector).await;

        poll_buses(&registry, &gate).await;

        assert_eq!(mock.reads().len(), 2);
        assert_eq!(mock.connects(), 1);
        assert_eq!(registry.connected().await, vec!["A".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nan_register_becomes_field_error() {
        let json = r#"[
            {
                bus: { name: "F" },
                inputs: [
                    {
                        num: 3, format: ">f(flow)H(count)",
                        parser: { flow: { label: "flow", unit: "l/min" }, count: { label: "count" } }
                    }
                ]
            }
        ]"#;
        let connector = MockConnector::new();
        connector.bus("F").reply_words(&[0x7FC0, 0x0000, 9]);
        let (registry, gate) = ready(json, &connector).await;

        let readings = poll_buses(&registry, &gate).await;

        assert_eq!(
            readings,
            vec![
                Reading::error("flow", "l/min", NON_FINITE),
                Reading::value("count", "?", 9.0),
            ]
        );
        assert!(gate.errors());

        let bytes = serde_json::to_vec(&readings[0]).unwrap();
        let decoded: Reading = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.error_message(), Some(NON_FINITE));
    }

    #[test]
    fn test_overflowing_scale_is_not_finite() {
        let json = r#"[
            { bus: {}, inputs: [ { num: 4, format: ">d(big)", parser: { big: { label: "big", scale: 10 } } } ] }
        ]"#;
        let group = &buses(json)[0].inputs[0];
        let raw = f64::MAX.to_be_bytes();

        let readings = decode_group(group, &raw).unwrap();

        assert_eq!(readings[0].error_message(), Some(NON_FINITE));
    }

    #[test]
    fn test_fan_out_skips_unused_fields() {
        let group = &buses(TWO_GROUPS)[0].inputs[1];
        let readings = fan_out_error(group, "Timed out after 1000 ms");

        let labels: Vec<&str> = readings.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["flow", "pressure"]);
        assert!(readings.iter().all(|r| r.is_error()));
    }
}
