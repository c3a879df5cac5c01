use std::fmt;

use ndarray::{Array, Array1, ArrayD, Axis, Dimension, ErrorKind, IxDyn, ShapeError};
use serde::{Deserialize, Serialize};

use super::error::{DatasetError, Result};

// ---------------------------------------------------------------------------
// DType – element type tag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
    Int16,
    Int8,
    UInt64,
    UInt32,
    UInt16,
    UInt8,
    Bool,
    Utf8,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float64 => "float64",
            DType::Float32 => "float32",
            DType::Int64 => "int64",
            DType::Int32 => "int32",
            DType::Int16 => "int16",
            DType::Int8 => "int8",
            DType::UInt64 => "uint64",
            DType::UInt32 => "uint32",
            DType::UInt16 => "uint16",
            DType::UInt8 => "uint8",
            DType::Bool => "bool",
            DType::Utf8 => "utf8",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// NdArray – an owned n-dimensional array of one of the storable dtypes
// ---------------------------------------------------------------------------

/// Owned n-dimensional array. Scalars are 0-dimensional arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum NdArray {
    Float64(ArrayD<f64>),
    Float32(ArrayD<f32>),
    Int64(ArrayD<i64>),
    Int32(ArrayD<i32>),
    Int16(ArrayD<i16>),
    Int8(ArrayD<i8>),
    UInt64(ArrayD<u64>),
    UInt32(ArrayD<u32>),
    UInt16(ArrayD<u16>),
    UInt8(ArrayD<u8>),
    Bool(ArrayD<bool>),
    Utf8(ArrayD<String>),
}

/// Evaluate `$body` with `$arr` bound to the inner array, whatever its dtype.
macro_rules! with_array {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NdArray::Float64($arr) => $body,
            NdArray::Float32($arr) => $body,
            NdArray::Int64($arr) => $body,
            NdArray::Int32($arr) => $body,
            NdArray::Int16($arr) => $body,
            NdArray::Int8($arr) => $body,
            NdArray::UInt64($arr) => $body,
            NdArray::UInt32($arr) => $body,
            NdArray::UInt16($arr) => $body,
            NdArray::UInt8($arr) => $body,
            NdArray::Bool($arr) => $body,
            NdArray::Utf8($arr) => $body,
        }
    };
}

/// Like `with_array!`, but rewraps the result in the same variant.
macro_rules! map_array {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NdArray::Float64($arr) => NdArray::Float64($body),
            NdArray::Float32($arr) => NdArray::Float32($body),
            NdArray::Int64($arr) => NdArray::Int64($body),
            NdArray::Int32($arr) => NdArray::Int32($body),
            NdArray::Int16($arr) => NdArray::Int16($body),
            NdArray::Int8($arr) => NdArray::Int8($body),
            NdArray::UInt64($arr) => NdArray::UInt64($body),
            NdArray::UInt32($arr) => NdArray::UInt32($body),
            NdArray::UInt16($arr) => NdArray::UInt16($body),
            NdArray::UInt8($arr) => NdArray::UInt8($body),
            NdArray::Bool($arr) => NdArray::Bool($body),
            NdArray::Utf8($arr) => NdArray::Utf8($body),
        }
    };
}

macro_rules! concat_variant {
    ($variant:ident, $name:expr, $axis:expr, $parts:expr) => {{
        let mut views = Vec::with_capacity($parts.len());
        for part in $parts {
            match part {
                NdArray::$variant(a) => views.push(a.view()),
                other => {
                    return Err(DatasetError::DTypeMismatch {
                        name: $name.to_string(),
                        expected: DType::$variant,
                        found: other.dtype(),
                    })
                }
            }
        }
        NdArray::$variant(ndarray::concatenate(Axis($axis), &views)?)
    }};
}

/// Typed borrow of the inner array, `None` for any other dtype.
macro_rules! accessors {
    ($($fn_name:ident: $variant:ident($ty:ty)),* $(,)?) => {$(
        pub fn $fn_name(&self) -> Option<&ArrayD<$ty>> {
            match self {
                NdArray::$variant(a) => Some(a),
                _ => None,
            }
        }
    )*};
}

impl NdArray {
    pub fn dtype(&self) -> DType {
        match self {
            NdArray::Float64(_) => DType::Float64,
            NdArray::Float32(_) => DType::Float32,
            NdArray::Int64(_) => DType::Int64,
            NdArray::Int32(_) => DType::Int32,
            NdArray::Int16(_) => DType::Int16,
            NdArray::Int8(_) => DType::Int8,
            NdArray::UInt64(_) => DType::UInt64,
            NdArray::UInt32(_) => DType::UInt32,
            NdArray::UInt16(_) => DType::UInt16,
            NdArray::UInt8(_) => DType::UInt8,
            NdArray::Bool(_) => DType::Bool,
            NdArray::Utf8(_) => DType::Utf8,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-based `int64` ticks `0..n`.
    pub fn arange(n: usize) -> Self {
        NdArray::Int64(Array1::from_iter(0..n as i64).into_dyn())
    }

    accessors! {
        as_f64: Float64(f64),
        as_f32: Float32(f32),
        as_i64: Int64(i64),
        as_i32: Int32(i32),
        as_i16: Int16(i16),
        as_i8: Int8(i8),
        as_u64: UInt64(u64),
        as_u32: UInt32(u32),
        as_u16: UInt16(u16),
        as_u8: UInt8(u8),
        as_bool: Bool(bool),
        as_utf8: Utf8(String),
    }

    /// Add a new axis of length 1 at `axis`.
    pub fn insert_axis(self, axis: usize) -> Self {
        map_array!(self, a => a.insert_axis(Axis(axis)))
    }

    /// Add a new leading axis and repeat the array `n` times along it.
    pub fn broadcast_leading(&self, n: usize) -> Result<Self> {
        let mut shape = Vec::with_capacity(self.ndim() + 1);
        shape.push(n);
        shape.extend_from_slice(self.shape());
        let incompatible = || ShapeError::from_kind(ErrorKind::IncompatibleShape);
        Ok(map_array!(self, a => a
            .view()
            .insert_axis(Axis(0))
            .broadcast(IxDyn(&shape))
            .ok_or_else(incompatible)?
            .to_owned()))
    }

    /// Join arrays of one dtype along an existing axis.
    ///
    /// `name` only feeds error messages.
    pub fn concatenate(name: &str, axis: usize, parts: &[&NdArray]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| DatasetError::MissingVariable(name.to_string()))?;
        let joined = match first {
            NdArray::Float64(_) => concat_variant!(Float64, name, axis, parts),
            NdArray::Float32(_) => concat_variant!(Float32, name, axis, parts),
            NdArray::Int64(_) => concat_variant!(Int64, name, axis, parts),
            NdArray::Int32(_) => concat_variant!(Int32, name, axis, parts),
            NdArray::Int16(_) => concat_variant!(Int16, name, axis, parts),
            NdArray::Int8(_) => concat_variant!(Int8, name, axis, parts),
            NdArray::UInt64(_) => concat_variant!(UInt64, name, axis, parts),
            NdArray::UInt32(_) => concat_variant!(UInt32, name, axis, parts),
            NdArray::UInt16(_) => concat_variant!(UInt16, name, axis, parts),
            NdArray::UInt8(_) => concat_variant!(UInt8, name, axis, parts),
            NdArray::Bool(_) => concat_variant!(Bool, name, axis, parts),
            NdArray::Utf8(_) => concat_variant!(Utf8, name, axis, parts),
        };
        Ok(joined)
    }

    /// Equal wherever neither side holds a NaN.
    pub fn equals_ignoring_nan(&self, other: &NdArray) -> bool {
        match (self, other) {
            (NdArray::Float64(a), NdArray::Float64(b)) => {
                a.shape() == b.shape()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.is_nan() || y.is_nan() || x == y)
            }
            (NdArray::Float32(a), NdArray::Float32(b)) => {
                a.shape() == b.shape()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.is_nan() || y.is_nan() || x == y)
            }
            _ => self == other,
        }
    }
}

macro_rules! impl_from {
    ($ty:ty, $variant:ident) => {
        impl<D: Dimension> From<Array<$ty, D>> for NdArray {
            fn from(a: Array<$ty, D>) -> Self {
                NdArray::$variant(a.into_dyn())
            }
        }

        impl From<Vec<$ty>> for NdArray {
            fn from(v: Vec<$ty>) -> Self {
                NdArray::$variant(Array1::from_vec(v).into_dyn())
            }
        }

        impl From<$ty> for NdArray {
            fn from(v: $ty) -> Self {
                NdArray::$variant(ArrayD::from_elem(IxDyn(&[]), v))
            }
        }
    };
}

impl_from!(f64, Float64);
impl_from!(f32, Float32);
impl_from!(i64, Int64);
impl_from!(i32, Int32);
impl_from!(i16, Int16);
impl_from!(i8, Int8);
impl_from!(u64, UInt64);
impl_from!(u32, UInt32);
impl_from!(u16, UInt16);
impl_from!(u8, UInt8);
impl_from!(bool, Bool);
impl_from!(String, Utf8);

impl From<Vec<&str>> for NdArray {
    fn from(v: Vec<&str>) -> Self {
        v.into_iter().map(str::to_string).collect::<Vec<_>>().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn scalars_are_zero_dimensional() {
        let s = NdArray::from(3.5);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.len(), 1);
        assert_eq!(s.dtype(), DType::Float64);
    }

    #[test]
    fn concatenate_along_first_axis() {
        let a = NdArray::from(arr2(&[[1i64, 2], [3, 4]]));
        let b = NdArray::from(arr2(&[[5i64, 6]]));
        let joined = NdArray::concatenate("v", 0, &[&a, &b]).unwrap();
        assert_eq!(joined.shape(), &[3, 2]);
        assert_eq!(
            joined,
            NdArray::from(arr2(&[[1i64, 2], [3, 4], [5, 6]]))
        );
    }

    #[test]
    fn concatenate_rejects_mixed_dtypes() {
        let a = NdArray::from(vec![1.0f64, 2.0]);
        let b = NdArray::from(vec![1i64, 2]);
        let err = NdArray::concatenate("v", 0, &[&a, &b]).unwrap_err();
        assert!(matches!(err, DatasetError::DTypeMismatch { .. }));
    }

    #[test]
    fn broadcast_repeats_along_new_axis() {
        let a = NdArray::from(arr1(&[1.0f32, 2.0, 3.0]));
        let b = a.broadcast_leading(2).unwrap();
        assert_eq!(b.shape(), &[2, 3]);
        assert_eq!(
            b,
            NdArray::from(arr2(&[[1.0f32, 2.0, 3.0], [1.0, 2.0, 3.0]]))
        );
    }

    #[test]
    fn nan_positions_do_not_conflict() {
        let a = NdArray::from(vec![1.0, f64::NAN, 3.0]);
        let b = NdArray::from(vec![1.0, 2.0, f64::NAN]);
        let c = NdArray::from(vec![1.0, 2.5, 3.0]);
        assert!(a.equals_ignoring_nan(&b));
        assert!(a.equals_ignoring_nan(&c));
        assert!(!b.equals_ignoring_nan(&c));
    }

    #[test]
    fn unsigned_and_bool_arrays_keep_their_dtype() {
        let u = NdArray::from(vec![1u32, 2, 3]);
        assert_eq!(u.dtype(), DType::UInt32);
        assert_eq!(u.as_u32().unwrap()[[2]], 3);
        assert!(u.as_i64().is_none());

        let mask = NdArray::from(arr2(&[[true, false], [false, true]]));
        assert_eq!(mask.dtype(), DType::Bool);
        assert_eq!(mask.dtype().to_string(), "bool");
        let joined = NdArray::concatenate("mask", 0, &[&mask, &mask]).unwrap();
        assert_eq!(joined.shape(), &[4, 2]);
    }

    #[test]
    fn arange_counts_from_zero() {
        assert_eq!(NdArray::arange(3), NdArray::from(vec![0i64, 1, 2]));
    }
}
