//! The fieldbus module: registry, state gate, poll cycle and writes.

use std::sync::Arc;
use tracing::{debug, info};

use fieldbus_common::Reading;

use crate::config::BusDefinition;
use crate::function::WriteValue;
use crate::registry::BusRegistry;
use crate::scheduler;
use crate::state::{ModuleState, StateGate};
use crate::transport::{Connector, ModbusConnector, WriteAck};
use crate::writer::{self, WriteError};

/// Owns every bus and the read/write gate.
pub struct FieldbusModule {
    registry: BusRegistry,
    gate: StateGate,
}

impl FieldbusModule {
    pub fn new(buses: Vec<BusDefinition>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry: BusRegistry::new(buses, connector),
            gate: StateGate::new(),
        }
    }

    /// Module talking Modbus through `tokio-modbus`.
    pub fn modbus(buses: Vec<BusDefinition>, development: bool) -> Self {
        let connector = if development {
            ModbusConnector::development()
        } else {
            ModbusConnector::new()
        };
        Self::new(buses, Arc::new(connector))
    }

    /// Connect all enabled buses and open the gate.
    ///
    /// Buses that fail to connect are retried on the next cycle or write.
    pub async fn init(&self) -> usize {
        let enabled = self.registry.enabled().count();
        let connected = self.registry.connect_all().await;
        self.gate.mark_ready();
        info!(
            "Fieldbus module ready: {}/{} bus(es) connected",
            connected, enabled
        );
        connected
    }

    /// Run one poll cycle.
    ///
    /// Returns `None` without touching any bus when a cycle or write is
    /// already in progress, or before [`init`](Self::init).
    pub async fn read(&self) -> Option<Vec<Reading>> {
        let Some(_guard) = self.gate.try_begin_read() else {
            debug!("Poll cycle skipped: module is {}", self.gate.state());
            return None;
        };
        Some(scheduler::poll_buses(&self.registry, &self.gate).await)
    }

    /// Write `value` to the output labeled `label`.
    pub async fn write(
        &self,
        label: &str,
        value: impl Into<WriteValue>,
    ) -> Result<WriteAck, WriteError> {
        writer::write(&self.registry, &self.gate, label, value.into()).await
    }

    pub fn state(&self) -> ModuleState {
        self.gate.state()
    }

    /// Whether any group failed during the last poll cycle.
    pub fn errors(&self) -> bool {
        self.gate.errors()
    }

    /// Names of buses with an open transport.
    pub async fn connected_buses(&self) -> Vec<String> {
        self.registry.connected().await
    }

    pub fn bus_names(&self) -> Vec<String> {
        self.registry
            .buses()
            .iter()
            .map(|bus| bus.name().to_string())
            .collect()
    }

    /// Close every open transport.
    pub async fn close(&self) {
        self.registry.close_all().await;
        info!("Fieldbus module closed");
    }
}
