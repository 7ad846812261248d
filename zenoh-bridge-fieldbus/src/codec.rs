//! Register codec: raw bytes <-> layout fields, and encoded bytes -> wire
//! write requests.

use thiserror::Error;

use crate::function::{WriteFunction, WriteRequest};
use crate::layout::{BinaryLayout, ByteOrder, FieldType, LayoutItem};

/// The payload is too short for the layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload of {actual} bytes is shorter than the {expected} bytes required by layout '{layout}'")]
pub struct DecodeError {
    pub layout: String,
    pub expected: usize,
    pub actual: usize,
}

/// Values could not be packed for a write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("layout '{layout}' takes {expected} value(s), got {actual}")]
    Arity {
        layout: String,
        expected: usize,
        actual: usize,
    },
    #[error("value for '{key}' is not a finite number")]
    NotFinite { key: String },
    #[error("value {value} for {ty} field '{key}' is not an integer")]
    NotIntegral { key: String, ty: FieldType, value: f64 },
    #[error("value {value} is out of range for {ty} field '{key}'")]
    OutOfRange { key: String, ty: FieldType, value: f64 },
    #[error("{function} needs whole 16-bit words, layout produced {bytes} bytes")]
    WordAlignment { function: WriteFunction, bytes: usize },
    #[error("{function} writes {expected}, layout produced {actual}")]
    Count {
        function: WriteFunction,
        expected: String,
        actual: usize,
    },
}

/// Decode `raw` according to `layout`.
///
/// Returns `(key, value)` pairs in layout order. Bytes past the end of the
/// layout are ignored.
pub fn decode<'a>(layout: &'a BinaryLayout, raw: &[u8]) -> Result<Vec<(&'a str, f64)>, DecodeError> {
    let expected = layout.byte_len();
    if raw.len() < expected {
        return Err(DecodeError {
            layout: layout.as_str().to_string(),
            expected,
            actual: raw.len(),
        });
    }

    let order = layout.order();
    let mut offset = 0;
    let mut values = Vec::with_capacity(layout.field_count());

    for item in layout.items() {
        match item {
            LayoutItem::Padding(n) => offset += n,
            LayoutItem::Field { key, ty } => {
                let bytes = &raw[offset..offset + ty.size()];
                values.push((key.as_str(), read_value(*ty, order, bytes)));
                offset += ty.size();
            }
        }
    }

    Ok(values)
}

macro_rules! from_bytes {
    ($ty:ty, $order:expr, $bytes:expr) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        buf.copy_from_slice($bytes);
        match $order {
            ByteOrder::Big => <$ty>::from_be_bytes(buf),
            ByteOrder::Little => <$ty>::from_le_bytes(buf),
        }
    }};
}

macro_rules! to_bytes {
    ($value:expr, $order:expr, $out:expr) => {{
        match $order {
            ByteOrder::Big => $out.extend_from_slice(&$value.to_be_bytes()),
            ByteOrder::Little => $out.extend_from_slice(&$value.to_le_bytes()),
        }
    }};
}

fn read_value(ty: FieldType, order: ByteOrder, bytes: &[u8]) -> f64 {
    match ty {
        FieldType::I8 => bytes[0] as i8 as f64,
        FieldType::U8 => bytes[0] as f64,
        FieldType::Bool => {
            if bytes[0] != 0 {
                1.0
            } else {
                0.0
            }
        }
        FieldType::I16 => from_bytes!(i16, order, bytes) as f64,
        FieldType::U16 => from_bytes!(u16, order, bytes) as f64,
        FieldType::I32 => from_bytes!(i32, order, bytes) as f64,
        FieldType::U32 => from_bytes!(u32, order, bytes) as f64,
        FieldType::I64 => from_bytes!(i64, order, bytes) as f64,
        FieldType::U64 => from_bytes!(u64, order, bytes) as f64,
        FieldType::F32 => from_bytes!(f32, order, bytes) as f64,
        FieldType::F64 => from_bytes!(f64, order, bytes),
    }
}

/// Pack `values` (one per value field, in layout order) into bytes.
pub fn encode(layout: &BinaryLayout, values: &[f64]) -> Result<Vec<u8>, EncodeError> {
    let expected = layout.field_count();
    if values.len() != expected {
        return Err(EncodeError::Arity {
            layout: layout.as_str().to_string(),
            expected,
            actual: values.len(),
        });
    }

    let order = layout.order();
    let mut out = Vec::with_capacity(layout.byte_len());
    let mut values = values.iter().copied();

    for item in layout.items() {
        let (key, ty) = match item {
            LayoutItem::Padding(n) => {
                out.resize(out.len() + n, 0);
                continue;
            }
            LayoutItem::Field { key, ty } => (key, *ty),
        };
        let Some(value) = values.next() else { break };
        check_value(key, ty, value)?;

        match ty {
            FieldType::I8 => out.push(value as i8 as u8),
            FieldType::U8 | FieldType::Bool => out.push(value as u8),
            FieldType::I16 => to_bytes!(value as i16, order, out),
            FieldType::U16 => to_bytes!(value as u16, order, out),
            FieldType::I32 => to_bytes!(value as i32, order, out),
            FieldType::U32 => to_bytes!(value as u32, order, out),
            FieldType::I64 => to_bytes!(value as i64, order, out),
            FieldType::U64 => to_bytes!(value as u64, order, out),
            FieldType::F32 => to_bytes!(value as f32, order, out),
            FieldType::F64 => to_bytes!(value, order, out),
        }
    }

    Ok(out)
}

fn check_value(key: &str, ty: FieldType, value: f64) -> Result<(), EncodeError> {
    if !value.is_finite() {
        return Err(EncodeError::NotFinite {
            key: key.to_string(),
        });
    }
    if let Some((min, end)) = ty.integer_range() {
        if value.fract() != 0.0 {
            return Err(EncodeError::NotIntegral {
                key: key.to_string(),
                ty,
                value,
            });
        }
        if value < min || value >= end {
            return Err(EncodeError::OutOfRange {
                key: key.to_string(),
                ty,
                value,
            });
        }
    } else if ty == FieldType::F32 && value.abs() > f32::MAX as f64 {
        return Err(EncodeError::OutOfRange {
            key: key.to_string(),
            ty,
            value,
        });
    }
    Ok(())
}

/// Reinterpret encoded bytes as the argument `function` takes.
///
/// Coil functions treat each byte as one coil (non-zero is on). Register
/// functions read the bytes as big-endian 16-bit words.
pub fn to_write_request(bytes: &[u8], function: WriteFunction) -> Result<WriteRequest, EncodeError> {
    let request = if function.is_bit_oriented() {
        let bits: Vec<bool> = bytes.iter().map(|b| *b != 0).collect();
        check_count(function, bits.len(), "coil")?;
        match function {
            WriteFunction::WriteCoil => WriteRequest::SingleCoil(bits[0]),
            _ => WriteRequest::MultipleCoils(bits),
        }
    } else {
        if bytes.len() % 2 != 0 {
            return Err(EncodeError::WordAlignment {
                function,
                bytes: bytes.len(),
            });
        }
        let words: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        check_count(function, words.len(), "register")?;
        match function {
            WriteFunction::WriteRegister => WriteRequest::SingleRegister(words[0]),
            _ => WriteRequest::MultipleRegisters(words),
        }
    };
    Ok(request)
}

fn check_count(function: WriteFunction, actual: usize, item: &str) -> Result<(), EncodeError> {
    let max = function.max_items();
    let valid = if max == 1 {
        actual == 1
    } else {
        (1..=max).contains(&actual)
    };
    if valid {
        return Ok(());
    }
    let expected = if max == 1 {
        format!("exactly one {}", item)
    } else {
        format!("1 to {} {}s", max, item)
    };
    Err(EncodeError::Count {
        function,
        expected,
        actual,
    })
}

/// Register words as big-endian bytes, as they travel on the wire.
pub fn registers_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Coil/discrete states packed LSB-first, eight per byte.
pub fn coils_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, bit)| if *bit { byte | (1 << i) } else { byte })
        })
        .collect()
}

/// Round to `precision` decimal places, halves away from zero.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let multiplier = 10f64.powi(precision as i32);
    (value * multiplier).round() / multiplier
}

/// Lowercase hex rendering for logs.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
