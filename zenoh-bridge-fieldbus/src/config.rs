//! Configuration for the fieldbus bridge.
//!
//! The `fieldbus.buses` array keeps the shape of the per-bus configuration files: each
//! entry carries a `bus` block plus `inputs` (polled) and `outputs`
//! (written on demand). Missing keys take the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use fieldbus_common::config::{LoggingConfig, ZenohConfig};
use fieldbus_common::{DEFAULT_KEY_PREFIX, Format};

use crate::function::{ReadFunction, ValueShape, WriteFunction};
use crate::layout::BinaryLayout;
use crate::transport::ReadRequest;

/// Label marker for layout slots that are decoded but never reported.
pub const UNUSED_LABEL_MARKER: &str = "_none_";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] fieldbus_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldbusBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Bus, polling and publishing settings
    pub fieldbus: FieldbusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fieldbus section of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldbusConfig {
    /// Key expression prefix (default: "fieldbus/modbus")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Interval between poll cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Payload format for published readings
    #[serde(default)]
    pub serialization: Format,

    /// Development mode settings
    #[serde(default)]
    pub development: Option<DevelopmentConfig>,

    /// Configured buses, in declaration order
    pub buses: Vec<BusDefinition>,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Development mode: readings come from a fixture file instead of the buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevelopmentConfig {
    /// JSON object mapping labels to values
    pub fixture: PathBuf,
}

/// One bus with its input and output groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusDefinition {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub inputs: Vec<InputGroup>,

    #[serde(default)]
    pub outputs: Vec<OutputGroup>,
}

/// Transport kind of a bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    /// Serial line (Modbus RTU)
    #[default]
    #[serde(rename = "RTU", alias = "rtu", alias = "UDP", alias = "SERIAL", alias = "serial")]
    Rtu,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "TCP",
            TransportKind::Rtu => "RTU",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Connection and pacing parameters for one bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus name, unique across the configuration
    #[serde(default = "default_bus_name")]
    pub name: String,

    #[serde(rename = "type", default)]
    pub transport: TransportKind,

    /// Serial device path
    #[serde(default = "default_serial_port")]
    pub serial_port: String,

    /// Serial device path used in development mode (empty: not connected)
    #[serde(default)]
    pub dev_serial_port: String,

    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    #[serde(default)]
    pub parity: Parity,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Pause between consecutive reads on this bus, in milliseconds
    #[serde(default = "default_read_delay")]
    pub read_delay: u64,

    /// Pause after each write on this bus, in milliseconds
    #[serde(default = "default_write_delay")]
    pub write_delay: u64,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_bus_name() -> String {
    "ttyUSB0".to_string()
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baudrate() -> u32 {
    9600
}

fn default_timeout() -> u64 {
    1000
}

fn default_read_delay() -> u64 {
    20
}

fn default_write_delay() -> u64 {
    40
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1502
}

fn default_enabled() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: default_bus_name(),
            transport: TransportKind::default(),
            serial_port: default_serial_port(),
            dev_serial_port: String::new(),
            baudrate: default_baudrate(),
            parity: Parity::default(),
            timeout: default_timeout(),
            read_delay: default_read_delay(),
            write_delay: default_write_delay(),
            host: default_host(),
            port: default_port(),
            enabled: default_enabled(),
        }
    }
}

/// Where a bus connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Serial { path: String, baudrate: u32, parity: Parity },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "modbus://{}:{}", host, port),
            Endpoint::Serial { path, baudrate, .. } => write!(f, "{}@{}", path, baudrate),
        }
    }
}

impl BusConfig {
    /// Endpoint for this bus; development mode swaps in `dev_serial_port`.
    pub fn endpoint(&self, development: bool) -> Endpoint {
        match self.transport {
            TransportKind::Tcp => Endpoint::Tcp {
                host: self.host.clone(),
                port: self.port,
            },
            TransportKind::Rtu => Endpoint::Serial {
                path: if development {
                    self.dev_serial_port.clone()
                } else {
                    self.serial_port.clone()
                },
                baudrate: self.baudrate,
                parity: self.parity,
            },
        }
    }
}

/// Semantic description of one decoded layout field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(default = "default_label")]
    pub label: String,

    #[serde(default = "default_unit")]
    pub unit: String,

    /// Multiplier applied to the decoded value
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_label() -> String {
    "First".to_string()
}

fn default_unit() -> String {
    "?".to_string()
}

fn default_scale() -> f64 {
    1.0
}

impl FieldSpec {
    /// Whether the slot is decoded but never reported.
    pub fn is_unused(&self) -> bool {
        self.label.contains(UNUSED_LABEL_MARKER)
    }
}

/// A Modbus request template bound to a bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "F: Serialize",
    deserialize = "F: Deserialize<'de> + Default"
))]
pub struct RegisterGroup<F> {
    /// Slave/unit id
    #[serde(rename = "id", default = "default_slave_id")]
    pub slave_id: u8,

    #[serde(rename = "add", default = "default_start_address")]
    pub start_address: u16,

    /// Number of registers or coils
    #[serde(rename = "num", default = "default_count")]
    pub count: u16,

    #[serde(rename = "fc", default)]
    pub function: F,

    #[serde(rename = "format", default = "default_layout")]
    pub layout: BinaryLayout,

    /// Layout key -> field description
    #[serde(rename = "parser", default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

/// Group polled every cycle.
pub type InputGroup = RegisterGroup<ReadFunction>;

/// Group written on demand.
pub type OutputGroup = RegisterGroup<WriteFunction>;

fn default_slave_id() -> u8 {
    1
}

fn default_start_address() -> u16 {
    1
}

fn default_count() -> u16 {
    1
}

fn default_layout() -> BinaryLayout {
    BinaryLayout::single_u16_le("first")
}

impl<F> RegisterGroup<F> {
    /// Fields that are reported, in layout order followed by any field the
    /// layout does not mention.
    ///
    /// This is the label/unit set a failed request fans out to.
    pub fn active_fields(&self) -> Vec<&FieldSpec> {
        let in_layout = self.layout.keys().filter_map(|key| self.fields.get(key));
        let outside = self
            .fields
            .iter()
            .filter(|(key, _)| !self.layout.contains_key(key))
            .map(|(_, spec)| spec);

        in_layout
            .chain(outside)
            .filter(|spec| !spec.is_unused())
            .collect()
    }

    /// Find the field carrying `label`.
    pub fn field_by_label(&self, label: &str) -> Option<&FieldSpec> {
        self.fields.values().find(|spec| spec.label == label)
    }

    /// Short identity used in logs.
    pub fn describe(&self) -> String {
        format!(
            "id {} add {} num {}",
            self.slave_id, self.start_address, self.count
        )
    }
}

impl InputGroup {
    pub fn read_request(&self) -> ReadRequest {
        ReadRequest {
            slave: self.slave_id,
            function: self.function,
            address: self.start_address,
            count: self.count,
        }
    }
}

impl FieldbusBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: FieldbusBridgeConfig = fieldbus_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: FieldbusBridgeConfig = fieldbus_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_buses(&self.fieldbus.buses)?;

        if self.fieldbus.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Validate a set of bus definitions.
pub fn validate_buses(buses: &[BusDefinition]) -> Result<(), ConfigError> {
    if buses.is_empty() {
        return Err(ConfigError::Validation(
            "At least one bus must be configured".to_string(),
        ));
    }

    let mut names = HashSet::new();
    let mut output_labels: HashSet<&str> = HashSet::new();

    for definition in buses {
        let bus = &definition.bus;

        if bus.name.is_empty() {
            return Err(ConfigError::Validation(
                "Bus name cannot be empty".to_string(),
            ));
        }

        if !names.insert(bus.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Bus '{}' is declared more than once",
                bus.name
            )));
        }

        check_range(&bus.name, "timeout", bus.timeout, 10, 3000)?;
        check_range(&bus.name, "read_delay", bus.read_delay, 5, 3000)?;
        check_range(&bus.name, "write_delay", bus.write_delay, 5, 3000)?;

        for (index, group) in definition.inputs.iter().enumerate() {
            let context = format!("Bus '{}' input #{}", bus.name, index);
            check_group(&context, group)?;
            for spec in group.fields.values().filter(|spec| !spec.is_unused()) {
                check_label(&context, &spec.label, true)?;
            }

            let available = group.function.payload_len(group.count);
            if group.layout.byte_len() > available {
                return Err(ConfigError::Validation(format!(
                    "{}: layout '{}' needs {} bytes but {} {} return only {}",
                    context,
                    group.layout,
                    group.layout.byte_len(),
                    group.count,
                    group.function,
                    available
                )));
            }
        }

        for (index, group) in definition.outputs.iter().enumerate() {
            let context = format!("Bus '{}' output #{}", bus.name, index);
            check_group(&context, group)?;

            if group.function.shape() == ValueShape::Scalar && group.layout.field_count() != 1 {
                return Err(ConfigError::Validation(format!(
                    "{}: {} takes a single value but layout '{}' has {} fields",
                    context,
                    group.function,
                    group.layout,
                    group.layout.field_count()
                )));
            }

            if !group.function.is_bit_oriented() && group.layout.byte_len() % 2 != 0 {
                return Err(ConfigError::Validation(format!(
                    "{}: layout '{}' does not fill whole registers",
                    context, group.layout
                )));
            }

            for spec in group.fields.values().filter(|spec| !spec.is_unused()) {
                check_label(&context, &spec.label, false)?;
                if !output_labels.insert(spec.label.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "{}: output label '{}' is already used by another output",
                        context, spec.label
                    )));
                }
            }
        }
    }

    Ok(())
}

fn check_range(bus: &str, key: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "Bus '{}': {} must be between {} and {} ms, got {}",
            bus, key, min, max, value
        )))
    }
}

/// Labels become Zenoh key chunks under the bridge prefix.
///
/// Output labels must be a single chunk to match the write subscription.
fn check_label(context: &str, label: &str, nested: bool) -> Result<(), ConfigError> {
    let invalid = |reason: &str| -> Result<(), ConfigError> {
        Err(ConfigError::Validation(format!(
            "{}: label '{}' {}",
            context, label, reason
        )))
    };

    if let Some(c) = label.chars().find(|c| matches!(c, '*' | '$' | '#' | '?')) {
        return invalid(&format!("contains '{}'", c));
    }
    if !nested && label.contains('/') {
        return invalid("must not contain '/'");
    }
    for chunk in label.split('/') {
        if chunk.is_empty() {
            return invalid("has an empty key segment");
        }
        if chunk.starts_with('@') {
            return invalid("has a segment starting with '@'");
        }
    }
    Ok(())
}

fn check_group<F>(context: &str, group: &RegisterGroup<F>) -> Result<(), ConfigError> {
    if group.count == 0 {
        return Err(ConfigError::Validation(format!(
            "{}: num must be at least 1",
            context
        )));
    }

    for key in group.fields.keys() {
        if !group.layout.contains_key(key) {
            return Err(ConfigError::Validation(format!(
                "{}: parser key '{}' is not a field of layout '{}'",
                context, key, group.layout
            )));
        }
    }

    Ok(())
}
