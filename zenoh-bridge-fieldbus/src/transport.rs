//! Transport capability used by the registry, scheduler and writer.
//!
//! Framing, CRC and transaction ids belong to `tokio-modbus`; this module only
//! adapts its client context to byte-oriented reads and typed writes.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::codec::{coils_to_bytes, registers_to_bytes};
use crate::config::{BusConfig, Endpoint, Parity, TransportKind};
use crate::function::{ReadFunction, WriteFunction, WriteRequest};

/// One read issued on behalf of an input group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub slave: u8,
    pub function: ReadFunction,
    pub address: u16,
    pub count: u16,
}

impl fmt::Display for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} slave {} @ {} x{}",
            self.function, self.slave, self.address, self.count
        )
    }
}

/// Acknowledgement returned by a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub function: WriteFunction,
    pub address: u16,
    pub count: usize,
}

/// Failure of a single request on an open transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Timed out after {0} ms")]
    Timeout(u64),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the link must be reopened before the next request.
    ///
    /// A timeout or framing error can leave a late response or a partial
    /// frame on the wire. Only a Modbus exception is a complete exchange.
    pub fn is_link_failure(&self) -> bool {
        !matches!(self, TransportError::Exception(_))
    }
}

/// Failure to open a bus.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Cannot reach {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connecting to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// An open, exclusively owned link to one bus.
#[async_trait]
pub trait Transport: Send {
    /// Issue a read and return the raw payload bytes.
    ///
    /// Register reads yield two big-endian bytes per register, bit reads one
    /// bit per item packed LSB-first.
    async fn read(&mut self, request: ReadRequest) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &mut self,
        slave: u8,
        address: u16,
        request: &WriteRequest,
    ) -> Result<WriteAck, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports for bus configurations.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, bus: &BusConfig) -> Result<Box<dyn Transport>, ConnectionError>;

    /// Endpoint this connector opens for `bus`.
    fn endpoint(&self, bus: &BusConfig) -> Endpoint {
        bus.endpoint(false)
    }
}

/// Connector backed by `tokio-modbus` over TCP or a serial line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusConnector {
    development: bool,
}

impl ModbusConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector for development mode: serial buses open `dev_serial_port`,
    /// TCP buses are not connected.
    pub fn development() -> Self {
        Self { development: true }
    }

    async fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Context, ConnectionError> {
        let endpoint = format!("{}:{}", host, port);
        let timeout_ms = timeout.as_millis() as u64;

        let addr: SocketAddr = match endpoint.parse() {
            Ok(addr) => addr,
            Err(_) => tokio::time::timeout(timeout, tokio::net::lookup_host(&endpoint))
                .await
                .map_err(|_| ConnectionError::Timeout {
                    endpoint: endpoint.clone(),
                    timeout_ms,
                })?
                .map_err(|source| ConnectionError::Unreachable {
                    endpoint: endpoint.clone(),
                    source,
                })?
                .next()
                .ok_or_else(|| {
                    ConnectionError::InvalidEndpoint(format!("{} resolves to no address", endpoint))
                })?,
        };

        tokio::time::timeout(timeout, tcp::connect_slave(addr, Slave(1)))
            .await
            .map_err(|_| ConnectionError::Timeout {
                endpoint: endpoint.clone(),
                timeout_ms,
            })?
            .map_err(|source| ConnectionError::Unreachable { endpoint, source })
    }

    fn open_serial(
        &self,
        path: &str,
        baudrate: u32,
        parity: Parity,
        timeout: Duration,
    ) -> Result<Context, ConnectionError> {
        if path.is_empty() {
            return Err(ConnectionError::InvalidEndpoint(
                "no serial device configured".to_string(),
            ));
        }

        let parity = match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };

        let builder = tokio_serial::new(path, baudrate)
            .parity(parity)
            .timeout(timeout);

        let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ConnectionError::Unreachable {
                endpoint: path.to_string(),
                source: e.into(),
            }
        })?;

        Ok(rtu::attach_slave(serial, Slave(1)))
    }
}

#[async_trait]
impl Connector for ModbusConnector {
    async fn connect(&self, bus: &BusConfig) -> Result<Box<dyn Transport>, ConnectionError> {
        let timeout = Duration::from_millis(bus.timeout);

        if self.development && bus.transport == TransportKind::Tcp {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "TCP bus '{}' is not connected in development mode",
                bus.name
            )));
        }

        let ctx = match self.endpoint(bus) {
            Endpoint::Tcp { host, port } => self.connect_tcp(&host, port, timeout).await?,
            Endpoint::Serial {
                path,
                baudrate,
                parity,
            } => self.open_serial(&path, baudrate, parity, timeout)?,
        };

        Ok(Box::new(ModbusTransport {
            ctx,
            timeout: bus.timeout,
        }))
    }

    fn endpoint(&self, bus: &BusConfig) -> Endpoint {
        bus.endpoint(self.development)
    }
}

/// A `tokio-modbus` client context plus the bus request timeout.
pub struct ModbusTransport {
    ctx: Context,
    timeout: u64,
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn read(&mut self, request: ReadRequest) -> Result<Vec<u8>, TransportError> {
        self.ctx.set_slave(Slave(request.slave));
        let io = Timed {
            timeout: self.timeout,
        };
        let ctx = &mut self.ctx;

        match request.function {
            ReadFunction::ReadCoils => {
                let bits = io
                    .call(ctx.read_coils(request.address, request.count))
                    .await?;
                Ok(coils_to_bytes(&bits))
            }
            ReadFunction::ReadDiscreteInputs => {
                let bits = io
                    .call(ctx.read_discrete_inputs(request.address, request.count))
                    .await?;
                Ok(coils_to_bytes(&bits))
            }
            ReadFunction::ReadHoldingRegisters => {
                let words = io
                    .call(ctx.read_holding_registers(request.address, request.count))
                    .await?;
                Ok(registers_to_bytes(&words))
            }
            ReadFunction::ReadInputRegisters => {
                let words = io
                    .call(ctx.read_input_registers(request.address, request.count))
                    .await?;
                Ok(registers_to_bytes(&words))
            }
        }
    }

    async fn write(
        &mut self,
        slave: u8,
        address: u16,
        request: &WriteRequest,
    ) -> Result<WriteAck, TransportError> {
        self.ctx.set_slave(Slave(slave));
        let io = Timed {
            timeout: self.timeout,
        };
        let ctx = &mut self.ctx;

        match request {
            WriteRequest::SingleCoil(bit) => {
                io.call(ctx.write_single_coil(address, *bit)).await?
            }
            WriteRequest::SingleRegister(word) => {
                io.call(ctx.write_single_register(address, *word)).await?
            }
            WriteRequest::MultipleCoils(bits) => {
                io.call(ctx.write_multiple_coils(address, bits)).await?
            }
            WriteRequest::MultipleRegisters(words) => {
                io.call(ctx.write_multiple_registers(address, words)).await?
            }
        }

        Ok(WriteAck {
            function: request.function(),
            address,
            count: request.len(),
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ctx.disconnect().await?;
        Ok(())
    }
}

/// Applies the bus timeout to one request and flattens the nested result.
struct Timed {
    timeout: u64,
}

impl Timed {
    async fn call<T, F>(&self, request: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<Result<T, ExceptionCode>, tokio_modbus::Error>>,
    {
        let response = tokio::time::timeout(Duration::from_millis(self.timeout), request)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?;

        match response {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(code)) => Err(TransportError::Exception(format!("{:?}", code))),
            Err(tokio_modbus::Error::Transport(e)) => Err(TransportError::Io(e)),
            Err(other) => Err(TransportError::Protocol(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_failure_classification() {
        let io = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "closed",
        ));
        assert!(io.is_link_failure());
        assert!(TransportError::Timeout(1000).is_link_failure());
        assert!(TransportError::Protocol("invalid CRC".to_string()).is_link_failure());
        assert!(!TransportError::Exception("IllegalDataAddress".to_string()).is_link_failure());
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            TransportError::Timeout(1000).to_string(),
            "Timed out after 1000 ms"
        );
    }

    #[test]
    fn test_read_request_display() {
        let request = ReadRequest {
            slave: 3,
            function: ReadFunction::ReadInputRegisters,
            address: 100,
            count: 2,
        };
        assert_eq!(request.to_string(), "readInputRegisters slave 3 @ 100 x2");
    }

    #[tokio::test]
    async fn test_development_refuses_tcp() {
        let bus = BusConfig {
            transport: TransportKind::Tcp,
            ..BusConfig::default()
        };
        let result = ModbusConnector::development().connect(&bus).await;
        assert!(matches!(result, Err(ConnectionError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_development_without_device() {
        let bus = BusConfig::default();
        let result = ModbusConnector::development().connect(&bus).await;
        assert!(matches!(result, Err(ConnectionError::InvalidEndpoint(_))));
    }
}
