//! Binary layout descriptors.
//!
//! A layout describes how the raw bytes of a register group map to named
//! numeric fields, using the struct-pack notation found in the bus
//! configuration files:
//!
//! ```text
//! >H(temp)h(offset)2x f(flow)
//! ```
//!
//! - An optional leading byte order: `<` little, `>`/`!` big, `=`/`@` native.
//!   Without one, big-endian (Modbus wire order) is used.
//! - Items are `[count]code[(name)]`. `x` skips `count` padding bytes; every
//!   other code produces `count` value fields.
//! - Unnamed value fields are keyed by their position among value fields
//!   (`"0"`, `"1"`, ...). Named fields cannot be repeated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a layout descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout '{0}' declares no value fields")]
    Empty(String),
    #[error("unknown type code '{code}' at position {position}")]
    UnknownCode { code: char, position: usize },
    #[error("repeat count at position {0} is not followed by a type code")]
    MissingCode(usize),
    #[error("repeat count at position {0} is invalid")]
    InvalidCount(usize),
    #[error("field name starting at position {0} is not terminated")]
    UnterminatedName(usize),
    #[error("empty field name at position {0}")]
    EmptyName(usize),
    #[error("field '{0}' is repeated; name each slot instead")]
    NamedRepeat(String),
    #[error("duplicate field key '{0}'")]
    DuplicateKey(String),
}

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

/// Fixed-width numeric field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl FieldType {
    fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => FieldType::I8,
            'B' => FieldType::U8,
            '?' => FieldType::Bool,
            'h' => FieldType::I16,
            'H' => FieldType::U16,
            'i' | 'l' => FieldType::I32,
            'I' | 'L' => FieldType::U32,
            'q' => FieldType::I64,
            'Q' => FieldType::U64,
            'f' => FieldType::F32,
            'd' => FieldType::F64,
            _ => return None,
        })
    }

    /// Width in bytes.
    pub fn size(&self) -> usize {
        match self {
            FieldType::I8 | FieldType::U8 | FieldType::Bool => 1,
            FieldType::I16 | FieldType::U16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => 8,
        }
    }

    /// Half-open range `[min, end)` of values an integer field can hold.
    ///
    /// The upper bound is exclusive because `i64::MAX` and `u64::MAX` are not
    /// representable as `f64`.
    pub fn integer_range(&self) -> Option<(f64, f64)> {
        Some(match self {
            FieldType::I8 => (i8::MIN as f64, 128.0),
            FieldType::U8 => (0.0, 256.0),
            FieldType::Bool => (0.0, 2.0),
            FieldType::I16 => (i16::MIN as f64, 32_768.0),
            FieldType::U16 => (0.0, 65_536.0),
            FieldType::I32 => (i32::MIN as f64, 2f64.powi(31)),
            FieldType::U32 => (0.0, 2f64.powi(32)),
            FieldType::I64 => (i64::MIN as f64, 2f64.powi(63)),
            FieldType::U64 => (0.0, 2f64.powi(64)),
            FieldType::F32 | FieldType::F64 => return None,
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::I8 => "i8",
            FieldType::U8 => "u8",
            FieldType::Bool => "bool",
            FieldType::I16 => "i16",
            FieldType::U16 => "u16",
            FieldType::I32 => "i32",
            FieldType::U32 => "u32",
            FieldType::I64 => "i64",
            FieldType::U64 => "u64",
            FieldType::F32 => "f32",
            FieldType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// One element of a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutItem {
    /// Bytes skipped on decode, zero-filled on encode.
    Padding(usize),
    /// A value field.
    Field { key: String, ty: FieldType },
}

/// A parsed binary layout descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BinaryLayout {
    source: String,
    order: ByteOrder,
    items: Vec<LayoutItem>,
}

impl BinaryLayout {
    /// Parse a layout descriptor.
    pub fn parse(source: &str) -> Result<Self, LayoutError> {
        let chars: Vec<char> = source.chars().collect();
        let mut pos = 0;
        let mut order = ByteOrder::default();
        let mut items = Vec::new();
        let mut value_index = 0usize;

        skip_whitespace(&chars, &mut pos);
        if let Some(&c) = chars.get(pos) {
            let explicit = match c {
                '<' => Some(ByteOrder::Little),
                '>' | '!' => Some(ByteOrder::Big),
                '=' | '@' => Some(ByteOrder::native()),
                _ => None,
            };
            if let Some(explicit) = explicit {
                order = explicit;
                pos += 1;
            }
        }

        loop {
            skip_whitespace(&chars, &mut pos);
            let Some(&c) = chars.get(pos) else { break };

            let count_start = pos;
            let count = if c.is_ascii_digit() {
                while chars.get(pos).is_some_and(|c| c.is_ascii_digit()) {
                    pos += 1;
                }
                let digits: String = chars[count_start..pos].iter().collect();
                let count: usize = digits
                    .parse()
                    .map_err(|_| LayoutError::InvalidCount(count_start))?;
                if count == 0 {
                    return Err(LayoutError::InvalidCount(count_start));
                }
                Some(count)
            } else {
                None
            };

            let Some(&code) = chars.get(pos) else {
                return Err(LayoutError::MissingCode(count_start));
            };
            let code_pos = pos;
            pos += 1;

            let name = if chars.get(pos) == Some(&'(') {
                let name_start = pos;
                let close = chars[pos..]
                    .iter()
                    .position(|&c| c == ')')
                    .ok_or(LayoutError::UnterminatedName(name_start))?;
                let name: String = chars[pos + 1..pos + close].iter().collect();
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(LayoutError::EmptyName(name_start));
                }
                pos += close + 1;
                Some(name)
            } else {
                None
            };

            if code == 'x' {
                items.push(LayoutItem::Padding(count.unwrap_or(1)));
                continue;
            }

            let ty = FieldType::from_code(code).ok_or(LayoutError::UnknownCode {
                code,
                position: code_pos,
            })?;

            match name {
                Some(name) => {
                    if count.is_some_and(|n| n > 1) {
                        return Err(LayoutError::NamedRepeat(name));
                    }
                    items.push(LayoutItem::Field { key: name, ty });
                    value_index += 1;
                }
                None => {
                    for _ in 0..count.unwrap_or(1) {
                        items.push(LayoutItem::Field {
                            key: value_index.to_string(),
                            ty,
                        });
                        value_index += 1;
                    }
                }
            }
        }

        if value_index == 0 {
            return Err(LayoutError::Empty(source.to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for key in items.iter().filter_map(LayoutItem::key) {
            if !seen.insert(key) {
                return Err(LayoutError::DuplicateKey(key.to_string()));
            }
        }

        Ok(Self {
            source: source.to_string(),
            order,
            items,
        })
    }

    /// A single unsigned 16-bit field, little-endian: `<H(<key>)`.
    pub fn single_u16_le(key: &str) -> Self {
        Self {
            source: format!("<H({})", key),
            order: ByteOrder::Little,
            items: vec![LayoutItem::Field {
                key: key.to_string(),
                ty: FieldType::U16,
            }],
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn items(&self) -> &[LayoutItem] {
        &self.items
    }

    /// Number of bytes the layout covers.
    pub fn byte_len(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                LayoutItem::Padding(n) => *n,
                LayoutItem::Field { ty, .. } => ty.size(),
            })
            .sum()
    }

    /// Value field keys, in layout order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(LayoutItem::key)
    }

    /// Number of value fields.
    pub fn field_count(&self) -> usize {
        self.keys().count()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys().any(|k| k == key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl LayoutItem {
    pub fn key(&self) -> Option<&str> {
        match self {
            LayoutItem::Padding(_) => None,
            LayoutItem::Field { key, .. } => Some(key),
        }
    }
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).is_some_and(|c| c.is_whitespace()) {
        *pos += 1;
    }
}

impl FromStr for BinaryLayout {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BinaryLayout {
    type Error = LayoutError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<BinaryLayout> for String {
    fn from(layout: BinaryLayout) -> Self {
        layout.source
    }
}

impl fmt::Display for BinaryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
