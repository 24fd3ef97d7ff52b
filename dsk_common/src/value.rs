//! Value model shared by every process variable.
//!
//! A PV carries exactly one [`ValueType`], fixed at construction. Values
//! travel through the data-flow engine as the closed sum type [`Value`], so
//! the engine is written once instead of once per element type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ─── Timestamp ──────────────────────────────────────────────────────

/// Wall-clock instant attached to every pushed or written value.
///
/// Seconds and nanoseconds since the UNIX epoch. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Whole seconds since the epoch.
    pub secs: i64,
    /// Sub-second part, always `< 1_000_000_000`.
    pub nanos: u32,
}

impl Timestamp {
    /// The epoch itself. Used as "never set".
    pub const ZERO: Self = Self { secs: 0, nanos: 0 };

    /// Build a timestamp, normalising an overflowing nanosecond field.
    pub const fn from_secs_nanos(secs: i64, nanos: u32) -> Self {
        Self {
            secs: secs + (nanos / 1_000_000_000) as i64,
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: since.as_secs() as i64,
            nanos: since.subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

// ─── PV status ──────────────────────────────────────────────────────

/// Quality flag forwarded with every push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PvStatus {
    /// Value is valid.
    #[default]
    Success,
    /// Value was produced but the device flagged it as bad.
    Failure,
}

// ─── Value types ────────────────────────────────────────────────────

/// Element type of a process variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Int8Array,
    UInt8Array,
    Int16Array,
    UInt16Array,
    Int32Array,
    UInt32Array,
    Int64Array,
    Float32Array,
    Float64Array,
    BoolArray,
    String,
    Timestamp,
    TimestampArray,
}

impl ValueType {
    /// True for every array form (strings excluded).
    pub const fn is_array(&self) -> bool {
        matches!(
            self,
            Self::Int8Array
                | Self::UInt8Array
                | Self::Int16Array
                | Self::UInt16Array
                | Self::Int32Array
                | Self::UInt32Array
                | Self::Int64Array
                | Self::Float32Array
                | Self::Float64Array
                | Self::BoolArray
                | Self::TimestampArray
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A PV value. One variant per [`ValueType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Int8Array(Vec<i8>),
    UInt8Array(Vec<u8>),
    Int16Array(Vec<i16>),
    UInt16Array(Vec<u16>),
    Int32Array(Vec<i32>),
    UInt32Array(Vec<u32>),
    Int64Array(Vec<i64>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>),
    BoolArray(Vec<bool>),
    String(String),
    Timestamp(Timestamp),
    TimestampArray(Vec<Timestamp>),
}

/// Applies `$body` to the inner vector of any array variant, binding it to `$v`.
/// Non-array variants evaluate `$other`.
macro_rules! with_array {
    ($value:expr, $v:ident => $body:expr, _ => $other:expr) => {
        match $value {
            Value::Int8Array($v) => $body,
            Value::UInt8Array($v) => $body,
            Value::Int16Array($v) => $body,
            Value::UInt16Array($v) => $body,
            Value::Int32Array($v) => $body,
            Value::UInt32Array($v) => $body,
            Value::Int64Array($v) => $body,
            Value::Float32Array($v) => $body,
            Value::Float64Array($v) => $body,
            Value::BoolArray($v) => $body,
            Value::TimestampArray($v) => $body,
            _ => $other,
        }
    };
}

impl Value {
    /// Type tag of this value.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Int8(_) => ValueType::Int8,
            Self::Int16(_) => ValueType::Int16,
            Self::Int32(_) => ValueType::Int32,
            Self::Int64(_) => ValueType::Int64,
            Self::Float32(_) => ValueType::Float32,
            Self::Float64(_) => ValueType::Float64,
            Self::Int8Array(_) => ValueType::Int8Array,
            Self::UInt8Array(_) => ValueType::UInt8Array,
            Self::Int16Array(_) => ValueType::Int16Array,
            Self::UInt16Array(_) => ValueType::UInt16Array,
            Self::Int32Array(_) => ValueType::Int32Array,
            Self::UInt32Array(_) => ValueType::UInt32Array,
            Self::Int64Array(_) => ValueType::Int64Array,
            Self::Float32Array(_) => ValueType::Float32Array,
            Self::Float64Array(_) => ValueType::Float64Array,
            Self::BoolArray(_) => ValueType::BoolArray,
            Self::String(_) => ValueType::String,
            Self::Timestamp(_) => ValueType::Timestamp,
            Self::TimestampArray(_) => ValueType::TimestampArray,
        }
    }

    /// Zero / empty value of the given type. Seeds a PV before its first write.
    pub fn default_for(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Int8 => Self::Int8(0),
            ValueType::Int16 => Self::Int16(0),
            ValueType::Int32 => Self::Int32(0),
            ValueType::Int64 => Self::Int64(0),
            ValueType::Float32 => Self::Float32(0.0),
            ValueType::Float64 => Self::Float64(0.0),
            ValueType::Int8Array => Self::Int8Array(Vec::new()),
            ValueType::UInt8Array => Self::UInt8Array(Vec::new()),
            ValueType::Int16Array => Self::Int16Array(Vec::new()),
            ValueType::UInt16Array => Self::UInt16Array(Vec::new()),
            ValueType::Int32Array => Self::Int32Array(Vec::new()),
            ValueType::UInt32Array => Self::UInt32Array(Vec::new()),
            ValueType::Int64Array => Self::Int64Array(Vec::new()),
            ValueType::Float32Array => Self::Float32Array(Vec::new()),
            ValueType::Float64Array => Self::Float64Array(Vec::new()),
            ValueType::BoolArray => Self::BoolArray(Vec::new()),
            ValueType::String => Self::String(String::new()),
            ValueType::Timestamp => Self::Timestamp(Timestamp::ZERO),
            ValueType::TimestampArray => Self::TimestampArray(Vec::new()),
        }
    }

    /// Number of elements: array length, string length in bytes, 1 for scalars.
    pub fn element_count(&self) -> usize {
        if let Self::String(s) = self {
            return s.len();
        }
        with_array!(self, v => v.len(), _ => 1)
    }

    /// First `count` elements of an array value.
    ///
    /// `None` for scalars, strings, or arrays shorter than `count`.
    pub fn slice(&self, count: usize) -> Option<Self> {
        macro_rules! head {
            ($variant:ident, $v:expr) => {
                ($v.len() >= count).then(|| Self::$variant($v[..count].to_vec()))
            };
        }
        match self {
            Self::Int8Array(v) => head!(Int8Array, v),
            Self::UInt8Array(v) => head!(UInt8Array, v),
            Self::Int16Array(v) => head!(Int16Array, v),
            Self::UInt16Array(v) => head!(UInt16Array, v),
            Self::Int32Array(v) => head!(Int32Array, v),
            Self::UInt32Array(v) => head!(UInt32Array, v),
            Self::Int64Array(v) => head!(Int64Array, v),
            Self::Float32Array(v) => head!(Float32Array, v),
            Self::Float64Array(v) => head!(Float64Array, v),
            Self::BoolArray(v) => head!(BoolArray, v),
            Self::TimestampArray(v) => head!(TimestampArray, v),
            _ => None,
        }
    }

    /// Append another array of the same type to this one.
    ///
    /// Returns `false` (and leaves `self` untouched) on a type mismatch or
    /// when `self` is not an array.
    pub fn extend_from(&mut self, other: &Self) -> bool {
        macro_rules! join {
            ($($variant:ident),*) => {
                match (self, other) {
                    $((Self::$variant(a), Self::$variant(b)) => {
                        a.extend_from_slice(b);
                        true
                    })*
                    _ => false,
                }
            };
        }
        join!(
            Int8Array,
            UInt8Array,
            Int16Array,
            UInt16Array,
            Int32Array,
            UInt32Array,
            Int64Array,
            Float32Array,
            Float64Array,
            BoolArray,
            TimestampArray
        )
    }

    /// Scalar integer view. `None` for non-integer variants.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int8(v) => Some(v as i64),
            Self::Int16(v) => Some(v as i64),
            Self::Int32(v) => Some(v as i64),
            Self::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// `Int32` payload, if that is what this value is.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::Int32(v) => Some(v),
            _ => None,
        }
    }

    /// Scalar floating-point view of any numeric scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float32(v) => Some(v as f64),
            Self::Float64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Self::Int32Array(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Self::Float32Array(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::Float64Array(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Self::Timestamp(v)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
