//! Bus registry and connection manager.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::{BusConfig, BusDefinition, InputGroup, OutputGroup};
use crate::transport::{Connector, Transport, TransportError};

/// Slot holding the open transport of a bus, if any.
pub type Link = Option<Box<dyn Transport>>;

/// One configured bus and its (possibly absent) transport.
///
/// All traffic to the bus goes through [`BusHandle::acquire`], so at most
/// one request is in flight per bus.
pub struct BusHandle {
    definition: BusDefinition,
    connector: Arc<dyn Connector>,
    link: Mutex<Link>,
}

impl BusHandle {
    pub fn new(definition: BusDefinition, connector: Arc<dyn Connector>) -> Self {
        Self {
            definition,
            connector,
            link: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.bus.name
    }

    pub fn config(&self) -> &BusConfig {
        &self.definition.bus
    }

    pub fn inputs(&self) -> &[InputGroup] {
        &self.definition.inputs
    }

    pub fn outputs(&self) -> &[OutputGroup] {
        &self.definition.outputs
    }

    pub fn is_enabled(&self) -> bool {
        self.definition.bus.enabled
    }

    /// Whether a transport is currently open.
    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Take exclusive access to the bus, opening the transport if absent.
    ///
    /// The returned slot is still `None` when the bus is disabled or the
    /// connection attempt failed.
    pub async fn acquire(&self) -> MutexGuard<'_, Link> {
        let mut link = self.link.lock().await;
        if link.is_none() && self.is_enabled() {
            *link = self.open().await;
        }
        link
    }

    async fn open(&self) -> Option<Box<dyn Transport>> {
        let bus = self.config();
        let endpoint = self.connector.endpoint(bus);

        match self.connector.connect(bus).await {
            Ok(transport) => {
                info!(
                    protocol = %bus.transport,
                    bus = %bus.name,
                    endpoint = %endpoint,
                    "Connected to {} bus '{}' at {}",
                    bus.transport,
                    bus.name,
                    endpoint
                );
                Some(transport)
            }
            Err(e) => {
                error!(
                    protocol = %bus.transport,
                    bus = %bus.name,
                    endpoint = %endpoint,
                    "Failed to connect {} bus '{}': {}",
                    bus.transport,
                    bus.name,
                    e
                );
                None
            }
        }
    }

    /// Drop the transport after `err` if it left the link unusable.
    ///
    /// Returns true when the link was dropped.
    pub fn discard_on_failure(&self, link: &mut Link, err: &TransportError) -> bool {
        if !err.is_link_failure() {
            return false;
        }
        if link.take().is_some() {
            warn!(
                bus = %self.name(),
                "Bus '{}' lost its connection: {}",
                self.name(),
                err
            );
        }
        true
    }

    /// Close the transport if open.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        if let Some(mut transport) = link.take() {
            match transport.close().await {
                Ok(()) => debug!(bus = %self.name(), "Closed bus '{}'", self.name()),
                Err(e) => warn!(
                    bus = %self.name(),
                    "Error closing bus '{}': {}",
                    self.name(),
                    e
                ),
            }
        }
    }
}

/// All configured buses, in declaration order.
pub struct BusRegistry {
    buses: Vec<Arc<BusHandle>>,
}

impl BusRegistry {
    pub fn new(definitions: Vec<BusDefinition>, connector: Arc<dyn Connector>) -> Self {
        let buses = definitions
            .into_iter()
            .map(|definition| Arc::new(BusHandle::new(definition, connector.clone())))
            .collect();
        Self { buses }
    }

    pub fn buses(&self) -> &[Arc<BusHandle>] {
        &self.buses
    }

    /// Enabled buses, in declaration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<BusHandle>> {
        self.buses.iter().filter(|bus| bus.is_enabled())
    }

    /// Open every enabled bus concurrently. Returns the number connected.
    pub async fn connect_all(&self) -> usize {
        let tasks: Vec<_> = self
            .enabled()
            .map(|bus| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    let connected = bus.acquire().await.is_some();
                    connected
                })
            })
            .collect();

        let mut connected = 0;
        for task in tasks {
            match task.await {
                Ok(true) => connected += 1,
                Ok(false) => {}
                Err(e) => error!("Bus connect task failed: {}", e),
            }
        }
        connected
    }

    /// Names of buses with an open transport.
    pub async fn connected(&self) -> Vec<String> {
        let mut names = Vec::new();
        for bus in &self.buses {
            if bus.is_connected().await {
                names.push(bus.name().to_string());
            }
        }
        names
    }

    pub async fn close_all(&self) {
        for bus in &self.buses {
            bus.close().await;
        }
    }
}
