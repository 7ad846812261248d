//! In-memory transports for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::config::{BusConfig, BusDefinition, FieldbusBridgeConfig};
use crate::function::WriteRequest;
use crate::transport::{
    ConnectionError, Connector, ReadRequest, Transport, TransportError, WriteAck,
};

#[derive(Default)]
struct MockState {
    refuse: bool,
    reads: VecDeque<Result<Vec<u8>, TransportError>>,
    write_errors: VecDeque<TransportError>,
    read_log: Vec<(Instant, ReadRequest)>,
    write_log: Vec<(u8, u16, WriteRequest)>,
    connects: usize,
    closes: usize,
}

/// Scripted bus shared between a test and the transports it hands out.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn refuse_connect(&self) -> &Self {
        self.with(|s| s.refuse = true);
        self
    }

    pub fn accept_connect(&self) -> &Self {
        self.with(|s| s.refuse = false);
        self
    }

    /// Queue a successful read returning big-endian `words`.
    pub fn reply_words(&self, words: &[u16]) -> &Self {
        let bytes = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        self.with(|s| s.reads.push_back(Ok(bytes)));
        self
    }

    pub fn reply_bytes(&self, bytes: &[u8]) -> &Self {
        let bytes = bytes.to_vec();
        self.with(|s| s.reads.push_back(Ok(bytes)));
        self
    }

    pub fn fail_read(&self, err: TransportError) -> &Self {
        self.with(|s| s.reads.push_back(Err(err)));
        self
    }

    pub fn fail_write(&self, err: TransportError) -> &Self {
        self.with(|s| s.write_errors.push_back(err));
        self
    }

    pub fn reads(&self) -> Vec<ReadRequest> {
        self.with(|s| s.read_log.iter().map(|(_, r)| *r).collect())
    }

    pub fn read_times(&self) -> Vec<Instant> {
        self.with(|s| s.read_log.iter().map(|(t, _)| *t).collect())
    }

    pub fn writes(&self) -> Vec<(u8, u16, WriteRequest)> {
        self.with(|s| {
            s.write_log
                .iter()
                .cloned()
                .collect()
        })
    }

    pub fn connects(&self) -> usize {
        self.with(|s| s.connects)
    }

    pub fn closes(&self) -> usize {
        self.with(|s| s.closes)
    }
}

struct MockTransport {
    bus: MockBus,
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&mut self, request: ReadRequest) -> Result<Vec<u8>, TransportError> {
        self.bus.with(|s| {
            s.read_log.push((Instant::now(), request));
            s.reads
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Timeout(1000)))
        })
    }

    async fn write(
        &mut self,
        slave: u8,
        address: u16,
        request: &WriteRequest,
    ) -> Result<WriteAck, TransportError> {
        self.bus.with(|s| {
            s.write_log.push((slave, address, request.clone()));
            match s.write_errors.pop_front() {
                Some(err) => Err(err),
                None => Ok(WriteAck {
                    function: request.function(),
                    address,
                    count: request.len(),
                }),
            }
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.bus.with(|s| s.closes += 1);
        Ok(())
    }
}

/// Hands out [`MockBus`] transports by bus name.
#[derive(Clone, Default)]
pub struct MockConnector {
    buses: Arc<Mutex<HashMap<String, MockBus>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script for the bus called `name`, created on first use.
    pub fn bus(&self, name: &str) -> MockBus {
        self.buses
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, bus: &BusConfig) -> Result<Box<dyn Transport>, ConnectionError> {
        let mock = self.bus(&bus.name);
        let refused = mock.with(|s| {
            s.connects += 1;
            s.refuse
        });
        if refused {
            return Err(ConnectionError::Unreachable {
                endpoint: bus.endpoint(false).to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        Ok(Box::new(MockTransport { bus: mock }))
    }
}

/// A bus with default settings and no groups.
pub fn bus_definition(name: &str) -> BusDefinition {
    BusDefinition {
        bus: BusConfig {
            name: name.to_string(),
            ..BusConfig::default()
        },
        inputs: Vec::new(),
        outputs: Vec::new(),
    }
}

/// Parse the `buses` array of a JSON5 fieldbus section.
pub fn buses(json: &str) -> Vec<BusDefinition> {
    let config = format!("{{ fieldbus: {{ buses: {} }} }}", json);
    FieldbusBridgeConfig::parse(&config).unwrap().fieldbus.buses
}
