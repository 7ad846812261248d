//! Zenoh bridge for Modbus field devices.
//!
//! Polls input register groups on any number of buses (TCP or RTU/serial),
//! decodes them into labeled, scaled readings, and writes labeled outputs
//! on request.
//!
//! # Key Expressions
//!
//! ```text
//! fieldbus/modbus/<label>                    reading
//! fieldbus/modbus/@/status                   bridge status
//! fieldbus/modbus/@/write/<label>            write request (JSON number or array)
//! fieldbus/modbus/@/write-result/<label>     write outcome
//! ```
//!
//! # Library use
//!
//! ```ignore
//! use std::sync::Arc;
//! use zenoh_bridge_fieldbus::{FieldbusBridgeConfig, FieldbusModule};
//!
//! let config = FieldbusBridgeConfig::load_from_file("fieldbus.json5")?;
//! let module = FieldbusModule::modbus(config.fieldbus.buses, false);
//! module.init().await;
//! if let Some(readings) = module.read().await {
//!     // ...
//! }
//! module.write("valve1", 1.0).await?;
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod fixture;
pub mod function;
pub mod layout;
pub mod module;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod writer;

#[cfg(test)]
mod testing;

pub use config::{BusConfig, BusDefinition, ConfigError, FieldbusBridgeConfig, FieldSpec};
pub use function::{ReadFunction, WriteFunction, WriteRequest, WriteValue};
pub use layout::BinaryLayout;
pub use module::FieldbusModule;
pub use state::ModuleState;
pub use transport::{ConnectionError, Connector, ReadRequest, Transport, TransportError, WriteAck};
pub use writer::WriteError;
