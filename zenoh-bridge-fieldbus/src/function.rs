//! Supported Modbus function codes and the argument shape each one expects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Read functions usable by input groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadFunction {
    /// FC 0x01
    ReadCoils,
    /// FC 0x02
    ReadDiscreteInputs,
    /// FC 0x03
    #[default]
    ReadHoldingRegisters,
    /// FC 0x04
    ReadInputRegisters,
}

impl ReadFunction {
    pub fn code(&self) -> u8 {
        match self {
            ReadFunction::ReadCoils => 0x01,
            ReadFunction::ReadDiscreteInputs => 0x02,
            ReadFunction::ReadHoldingRegisters => 0x03,
            ReadFunction::ReadInputRegisters => 0x04,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadFunction::ReadCoils => "readCoils",
            ReadFunction::ReadDiscreteInputs => "readDiscreteInputs",
            ReadFunction::ReadHoldingRegisters => "readHoldingRegisters",
            ReadFunction::ReadInputRegisters => "readInputRegisters",
        }
    }

    /// Whether the response is a packed bit field rather than 16-bit words.
    pub fn is_bit_oriented(&self) -> bool {
        matches!(
            self,
            ReadFunction::ReadCoils | ReadFunction::ReadDiscreteInputs
        )
    }

    /// Number of payload bytes a response to `count` items carries.
    pub fn payload_len(&self, count: u16) -> usize {
        if self.is_bit_oriented() {
            usize::from(count).div_ceil(8)
        } else {
            usize::from(count) * 2
        }
    }
}

impl fmt::Display for ReadFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write functions usable by output groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteFunction {
    /// FC 0x05
    WriteCoil,
    /// FC 0x06
    WriteRegister,
    /// FC 0x0F
    #[serde(alias = "writeFC15")]
    WriteCoils,
    /// FC 0x10
    #[default]
    #[serde(alias = "writeFC16")]
    WriteRegisters,
}

impl WriteFunction {
    pub fn code(&self) -> u8 {
        match self {
            WriteFunction::WriteCoil => 0x05,
            WriteFunction::WriteRegister => 0x06,
            WriteFunction::WriteCoils => 0x0F,
            WriteFunction::WriteRegisters => 0x10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteFunction::WriteCoil => "writeCoil",
            WriteFunction::WriteRegister => "writeRegister",
            WriteFunction::WriteCoils => "writeCoils",
            WriteFunction::WriteRegisters => "writeRegisters",
        }
    }

    pub fn is_bit_oriented(&self) -> bool {
        matches!(self, WriteFunction::WriteCoil | WriteFunction::WriteCoils)
    }

    /// Shape of the value a caller must supply.
    pub fn shape(&self) -> ValueShape {
        match self {
            WriteFunction::WriteCoil | WriteFunction::WriteRegister => ValueShape::Scalar,
            WriteFunction::WriteCoils | WriteFunction::WriteRegisters => ValueShape::Sequence,
        }
    }

    /// Largest number of coils/registers one request may carry.
    pub fn max_items(&self) -> usize {
        match self {
            WriteFunction::WriteCoil | WriteFunction::WriteRegister => 1,
            WriteFunction::WriteCoils => 1968,
            WriteFunction::WriteRegisters => 123,
        }
    }
}

impl fmt::Display for WriteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar vs sequence argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Scalar,
    Sequence,
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueShape::Scalar => f.write_str("scalar"),
            ValueShape::Sequence => f.write_str("sequence"),
        }
    }
}

/// Value supplied by a caller for a labeled output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteValue {
    Scalar(f64),
    Sequence(Vec<f64>),
}

impl WriteValue {
    pub fn shape(&self) -> ValueShape {
        match self {
            WriteValue::Scalar(_) => ValueShape::Scalar,
            WriteValue::Sequence(_) => ValueShape::Sequence,
        }
    }

    /// Ordered values to feed the layout encoder.
    pub fn into_values(self) -> Vec<f64> {
        match self {
            WriteValue::Scalar(v) => vec![v],
            WriteValue::Sequence(values) => values,
        }
    }
}

impl From<f64> for WriteValue {
    fn from(v: f64) -> Self {
        WriteValue::Scalar(v)
    }
}

impl From<Vec<f64>> for WriteValue {
    fn from(values: Vec<f64>) -> Self {
        WriteValue::Sequence(values)
    }
}

/// A fully encoded write, ready for the wire.
///
/// Each variant carries exactly the argument its function code takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WriteRequest {
    SingleCoil(bool),
    SingleRegister(u16),
    MultipleCoils(Vec<bool>),
    MultipleRegisters(Vec<u16>),
}

impl WriteRequest {
    pub fn function(&self) -> WriteFunction {
        match self {
            WriteRequest::SingleCoil(_) => WriteFunction::WriteCoil,
            WriteRequest::SingleRegister(_) => WriteFunction::WriteRegister,
            WriteRequest::MultipleCoils(_) => WriteFunction::WriteCoils,
            WriteRequest::MultipleRegisters(_) => WriteFunction::WriteRegisters,
        }
    }

    /// Number of coils or registers written.
    pub fn len(&self) -> usize {
        match self {
            WriteRequest::SingleCoil(_) | WriteRequest::SingleRegister(_) => 1,
            WriteRequest::MultipleCoils(bits) => bits.len(),
            WriteRequest::MultipleRegisters(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteRequest::SingleCoil(bit) => write!(f, "{}", u8::from(*bit)),
            WriteRequest::SingleRegister(word) => write!(f, "{}", word),
            WriteRequest::MultipleCoils(bits) => {
                let bits: Vec<u8> = bits.iter().map(|b| u8::from(*b)).collect();
                write!(f, "{:?}", bits)
            }
            WriteRequest::MultipleRegisters(words) => write!(f, "{:?}", words),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names_parse() {
        let fc: ReadFunction = serde_json::from_str("\"readInputRegisters\"").unwrap();
        assert_eq!(fc, ReadFunction::ReadInputRegisters);
        assert_eq!(fc.code(), 0x04);

        let fc: WriteFunction = serde_json::from_str("\"writeFC15\"").unwrap();
        assert_eq!(fc, WriteFunction::WriteCoils);
        assert_eq!(fc.to_string(), "writeCoils");
    }

    #[test]
    fn test_device_identification_is_not_a_read_function() {
        let result: Result<ReadFunction, _> = serde_json::from_str("\"readDeviceIdentification\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_write_function_is_not_a_read_function() {
        let result: Result<ReadFunction, _> = serde_json::from_str("\"writeCoil\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(ReadFunction::ReadHoldingRegisters.payload_len(2), 4);
        assert_eq!(ReadFunction::ReadCoils.payload_len(1), 1);
        assert_eq!(ReadFunction::ReadDiscreteInputs.payload_len(9), 2);
    }

    #[test]
    fn test_shapes() {
        assert_eq!(WriteFunction::WriteCoil.shape(), ValueShape::Scalar);
        assert_eq!(WriteFunction::WriteRegister.shape(), ValueShape::Scalar);
        assert_eq!(WriteFunction::WriteCoils.shape(), ValueShape::Sequence);
        assert_eq!(WriteFunction::WriteRegisters.shape(), ValueShape::Sequence);
    }

    #[test]
    fn test_write_value_from_json() {
        let scalar: WriteValue = serde_json::from_str("1").unwrap();
        assert_eq!(scalar, WriteValue::Scalar(1.0));

        let seq: WriteValue = serde_json::from_str("[1, 0, 1]").unwrap();
        assert_eq!(seq.shape(), ValueShape::Sequence);
        assert_eq!(seq.into_values(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_write_request_display() {
        assert_eq!(WriteRequest::SingleCoil(true).to_string(), "1");
        assert_eq!(
            WriteRequest::MultipleRegisters(vec![1, 500]).to_string(),
            "[1, 500]"
        );
        assert_eq!(
            WriteRequest::MultipleCoils(vec![true, false]).function(),
            WriteFunction::WriteCoils
        );
    }
}
