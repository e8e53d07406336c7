//! Scalar element types and symbolic value ranges.

use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// On-disk element type of a raw pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelScalar {
    Bool,
    I8,
    U8,
    I16,
    U16,
    F32,
    F64,
}

impl PixelScalar {
    /// Bytes per element.
    pub fn size(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Map a NumPy dtype descriptor. Only the little-endian forms are accepted.
    pub fn from_npy_descr(descr: &str) -> Option<Self> {
        match descr {
            "|b1" => Some(Self::Bool),
            "|i1" => Some(Self::I8),
            "|u1" => Some(Self::U8),
            "<i2" => Some(Self::I16),
            "<u2" => Some(Self::U16),
            "<f4" => Some(Self::F32),
            "<f8" => Some(Self::F64),
            _ => None,
        }
    }

    /// Decode one little-endian element. `bytes` must hold at least `size()` bytes.
    #[inline]
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Bool => f32::from(u8::from(bytes[0] != 0)),
            Self::I8 => f32::from(bytes[0] as i8),
            Self::U8 => f32::from(bytes[0]),
            Self::I16 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            Self::U16 => f32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            Self::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            Self::F64 => f64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as f32,
        }
    }
}

/// Symbolic value domain of a source.
///
/// "Unknown" is modelled as `Option<BitRange>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitRange {
    U8,
    U10,
    U12,
    U16,
    /// `[0, 1]`
    Float,
    /// `[-1, 1]`
    Diff,
    /// `[0, 2π]`
    Phase,
    /// `[-π, π]`
    PhaseDiff,
    /// `[-125, 125]`
    I8,
}

impl BitRange {
    pub const ALL: [BitRange; 9] = [
        Self::U8,
        Self::U10,
        Self::U12,
        Self::U16,
        Self::Float,
        Self::Diff,
        Self::Phase,
        Self::PhaseDiff,
        Self::I8,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::U10 => "uint10",
            Self::U12 => "uint12",
            Self::U16 => "uint16",
            Self::Float => "float",
            Self::Diff => "diff",
            Self::Phase => "phase",
            Self::PhaseDiff => "phase_diff",
            Self::I8 => "int8",
        }
    }
}

/// Numeric `(min, max)` of a bit range.
pub fn range_to_float(range: BitRange) -> (f32, f32) {
    match range {
        BitRange::Float => (0.0, 1.0),
        BitRange::U8 => (0.0, 255.0),
        BitRange::U10 => (0.0, 1023.0),
        BitRange::U12 => (0.0, 4095.0),
        BitRange::U16 => (0.0, 65535.0),
        BitRange::Diff => (-1.0, 1.0),
        BitRange::Phase => (0.0, 2.0 * PI),
        BitRange::PhaseDiff => (-PI, PI),
        BitRange::I8 => (-125.0, 125.0),
    }
}

/// Classify a sample of values by its observed extent.
///
/// NaNs are skipped. Returns `None` when the extent is empty or degenerate
/// (`min == max`), or negative beyond `[-π, π]`.
pub fn detect_bit_range<I>(values: I) -> Option<BitRange>
where
    I: IntoIterator<Item = f32>,
{
    let (min, max) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<(f32, f32)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;

    if min == max {
        return None;
    }
    if min < 0.0 {
        return if min >= -1.1 && max <= 1.1 {
            Some(BitRange::Diff)
        } else if min >= -PI && max <= PI {
            Some(BitRange::PhaseDiff)
        } else {
            None
        };
    }

    Some(if max <= 1.5 {
        BitRange::Float
    } else if max <= 2.0 * PI {
        BitRange::Phase
    } else if max < 256.0 {
        BitRange::U8
    } else if max < 1024.0 {
        BitRange::U10
    } else if max < 4096.0 {
        BitRange::U12
    } else {
        BitRange::U16
    })
}

/// Default colormap hint of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMap {
    Gray,
    Hsv,
    Blackbody,
    Viridis,
    #[serde(rename = "prgn")]
    PRGn,
    #[serde(rename = "prgn_pos")]
    PRGnPos,
    #[serde(rename = "prgn_neg")]
    PRGnNeg,
    #[serde(rename = "rdbu")]
    RdBu,
}

impl ColorMap {
    pub const ALL: [ColorMap; 8] = [
        Self::Gray,
        Self::Hsv,
        Self::Blackbody,
        Self::Viridis,
        Self::PRGn,
        Self::PRGnPos,
        Self::PRGnNeg,
        Self::RdBu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gray => "gray",
            Self::Hsv => "hsv",
            Self::Blackbody => "blackbody",
            Self::Viridis => "viridis",
            Self::PRGn => "prgn",
            Self::PRGnPos => "prgn_pos",
            Self::PRGnNeg => "prgn_neg",
            Self::RdBu => "rdbu",
        }
    }
}

/// Opacity transfer function applied when a source is drawn as an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpacityFunction {
    Linear,
    LinearR,
    Centered,
    Fixed100,
    Fixed75,
    Fixed50,
    Fixed25,
    Fixed0,
}

impl OpacityFunction {
    pub const ALL: [OpacityFunction; 8] = [
        Self::Linear,
        Self::LinearR,
        Self::Centered,
        Self::Fixed100,
        Self::Fixed75,
        Self::Fixed50,
        Self::Fixed25,
        Self::Fixed0,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::LinearR => "linear_r",
            Self::Centered => "centered",
            Self::Fixed100 => "fixed_100",
            Self::Fixed75 => "fixed_75",
            Self::Fixed50 => "fixed_50",
            Self::Fixed25 => "fixed_25",
            Self::Fixed0 => "fixed_0",
        }
    }
}

/// Wire codes shared by the symbolic enums: 0 means "unset", `k` selects
/// variant `k - 1` of `ALL`.
macro_rules! wire_code {
    ($ty:ty) => {
        impl $ty {
            pub fn from_code(code: u8) -> Option<Self> {
                code.checked_sub(1)
                    .and_then(|idx| Self::ALL.get(usize::from(idx)).copied())
            }

            pub fn to_code(value: Option<Self>) -> u8 {
                value
                    .and_then(|v| Self::ALL.iter().position(|&x| x == v))
                    .map_or(0, |idx| idx as u8 + 1)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| format!("unknown {} '{s}'", stringify!($ty)))
            }
        }
    };
}

wire_code!(BitRange);
wire_code!(ColorMap);
wire_code!(OpacityFunction);
