//! Conversions between in-memory values and HDF5 element bytes.

use anyhow::{bail, ensure, Context, Result};
use ndarray::{ArrayD, IxDyn};

use super::format::{Attribute, Dataspace, Datatype};
use crate::data::{MetadataValue, NdArray};

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

fn le_bytes<T: Copy, const N: usize>(a: &ArrayD<T>, to: impl Fn(T) -> [u8; N]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() * N);
    for &v in a.iter() {
        out.extend_from_slice(&to(v));
    }
    out
}

/// HDF5 type and row-major element bytes of `values`.
pub fn encode_array(values: &NdArray) -> (Datatype, Vec<u8>) {
    let int = |size: u8, signed: bool| Datatype::Integer { size, signed };
    match values {
        NdArray::Float64(a) => (Datatype::Float { size: 8 }, le_bytes(a, f64::to_le_bytes)),
        NdArray::Float32(a) => (Datatype::Float { size: 4 }, le_bytes(a, f32::to_le_bytes)),
        NdArray::Int64(a) => (int(8, true), le_bytes(a, i64::to_le_bytes)),
        NdArray::Int32(a) => (int(4, true), le_bytes(a, i32::to_le_bytes)),
        NdArray::Int16(a) => (int(2, true), le_bytes(a, i16::to_le_bytes)),
        NdArray::Int8(a) => (int(1, true), le_bytes(a, i8::to_le_bytes)),
        NdArray::UInt64(a) => (int(8, false), le_bytes(a, u64::to_le_bytes)),
        NdArray::UInt32(a) => (int(4, false), le_bytes(a, u32::to_le_bytes)),
        NdArray::UInt16(a) => (int(2, false), le_bytes(a, u16::to_le_bytes)),
        NdArray::UInt8(a) => (int(1, false), le_bytes(a, u8::to_le_bytes)),
        NdArray::Bool(a) => (Datatype::Bool, a.iter().map(|&b| u8::from(b)).collect()),
        NdArray::Utf8(a) => {
            let size = a.iter().map(String::len).max().unwrap_or(0).max(1);
            let mut out = Vec::with_capacity(a.len() * size);
            for s in a.iter() {
                out.extend_from_slice(s.as_bytes());
                out.resize(out.len() + size - s.len(), 0);
            }
            let dt = Datatype::String {
                size: size as u32,
                utf8: true,
                space_padded: false,
            };
            (dt, out)
        }
    }
}

fn from_le<T, const N: usize>(raw: &[u8], shape: &[usize], from: impl Fn([u8; N]) -> T) -> Result<ArrayD<T>> {
    let values = raw
        .chunks_exact(N)
        .map(|c| {
            let mut b = [0u8; N];
            b.copy_from_slice(c);
            from(b)
        })
        .collect();
    Ok(ArrayD::from_shape_vec(IxDyn(shape), values)?)
}

fn decode_text(bytes: &[u8], space_padded: bool) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = String::from_utf8_lossy(&bytes[..end]);
    if space_padded {
        text.trim_end_matches(' ').to_string()
    } else {
        text.into_owned()
    }
}

/// Rebuild an array of `shape` from element bytes.
pub fn decode_array(dt: &Datatype, shape: &[usize], raw: &[u8]) -> Result<NdArray> {
    let count: usize = shape.iter().product();
    let needed = count * dt.size();
    ensure!(
        raw.len() >= needed,
        "expected {needed} bytes of data, found {}",
        raw.len()
    );
    let raw = &raw[..needed];

    let array = match dt {
        Datatype::Float { size: 8 } => NdArray::Float64(from_le(raw, shape, f64::from_le_bytes)?),
        Datatype::Float { size: 4 } => NdArray::Float32(from_le(raw, shape, f32::from_le_bytes)?),
        Datatype::Integer { size, signed: true } => match size {
            8 => NdArray::Int64(from_le(raw, shape, i64::from_le_bytes)?),
            4 => NdArray::Int32(from_le(raw, shape, i32::from_le_bytes)?),
            2 => NdArray::Int16(from_le(raw, shape, i16::from_le_bytes)?),
            _ => NdArray::Int8(from_le(raw, shape, i8::from_le_bytes)?),
        },
        Datatype::Integer { size, signed: false } => match size {
            8 => NdArray::UInt64(from_le(raw, shape, u64::from_le_bytes)?),
            4 => NdArray::UInt32(from_le(raw, shape, u32::from_le_bytes)?),
            2 => NdArray::UInt16(from_le(raw, shape, u16::from_le_bytes)?),
            _ => NdArray::UInt8(from_le(raw, shape, u8::from_le_bytes)?),
        },
        Datatype::Bool => NdArray::Bool(ArrayD::from_shape_vec(
            IxDyn(shape),
            raw.iter().map(|&b| b != 0).collect(),
        )?),
        Datatype::String {
            size, space_padded, ..
        } => {
            let size = (*size as usize).max(1);
            let values = raw
                .chunks_exact(size)
                .map(|c| decode_text(c, *space_padded))
                .collect();
            NdArray::Utf8(ArrayD::from_shape_vec(IxDyn(shape), values)?)
        }
        other => bail!("cannot load {other:?} elements as an array"),
    };
    Ok(array)
}

// ---------------------------------------------------------------------------
// Attribute values
// ---------------------------------------------------------------------------

impl Attribute {
    /// Store one metadata value natively; `Null` becomes an attribute
    /// with an empty dataspace.
    pub fn metadata(name: &str, value: &MetadataValue) -> Self {
        let (datatype, space, raw) = match value {
            MetadataValue::Null => (
                Datatype::Integer { size: 1, signed: true },
                Dataspace::Null,
                Vec::new(),
            ),
            MetadataValue::Bool(b) => (Datatype::Bool, Dataspace::Scalar, vec![u8::from(*b)]),
            MetadataValue::Integer(i) => (
                Datatype::Integer { size: 8, signed: true },
                Dataspace::Scalar,
                i.to_le_bytes().to_vec(),
            ),
            MetadataValue::Float(v) => (
                Datatype::Float { size: 8 },
                Dataspace::Scalar,
                v.to_le_bytes().to_vec(),
            ),
            MetadataValue::String(s) => return Self::text(name, s),
        };
        Self {
            name: name.to_string(),
            datatype,
            space,
            raw,
        }
    }

    /// Scalar fixed-length string.
    pub fn text(name: &str, value: &str) -> Self {
        let (datatype, raw) = encode_array(&NdArray::from(value.to_string()));
        Self {
            name: name.to_string(),
            datatype,
            space: Dataspace::Scalar,
            raw,
        }
    }

    pub fn int32(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::Integer { size: 4, signed: true },
            space: Dataspace::Scalar,
            raw: value.to_le_bytes().to_vec(),
        }
    }

    /// Read back a single value. Arrays of more than one element are
    /// rejected.
    pub fn to_metadata(&self) -> Result<MetadataValue> {
        let shape = self.space.shape()?;
        let count = self.space.len()?;
        if count == 0 {
            return Ok(MetadataValue::Null);
        }
        ensure!(
            count == 1,
            "attribute '{}' holds {count} values; only single values are supported",
            self.name
        );
        let value = decode_array(&self.datatype, &shape, &self.raw)
            .with_context(|| format!("attribute '{}'", self.name))?;
        let value = match value {
            NdArray::Float64(a) => a.iter().next().map(|&v| MetadataValue::Float(v)),
            NdArray::Float32(a) => a.iter().next().map(|&v| MetadataValue::Float(f64::from(v))),
            NdArray::Int64(a) => a.iter().next().map(|&v| MetadataValue::Integer(v)),
            NdArray::Int32(a) => a.iter().next().map(|&v| MetadataValue::Integer(v.into())),
            NdArray::Int16(a) => a.iter().next().map(|&v| MetadataValue::Integer(v.into())),
            NdArray::Int8(a) => a.iter().next().map(|&v| MetadataValue::Integer(v.into())),
            NdArray::UInt32(a) => a.iter().next().map(|&v| MetadataValue::Integer(v.into())),
            NdArray::UInt16(a) => a.iter().next().map(|&v| MetadataValue::Integer(v.into())),
            NdArray::UInt8(a) => a.iter().next().map(|&v| MetadataValue::Integer(v.into())),
            NdArray::UInt64(a) => match a.iter().next() {
                Some(&v) => Some(MetadataValue::Integer(i64::try_from(v).with_context(|| {
                    format!("attribute '{}' value {v} does not fit in i64", self.name)
                })?)),
                None => None,
            },
            NdArray::Bool(a) => a.iter().next().map(|&v| MetadataValue::Bool(v)),
            NdArray::Utf8(a) => a.iter().next().map(|v| MetadataValue::String(v.clone())),
        };
        value.with_context(|| format!("attribute '{}' is empty", self.name))
    }

    pub fn to_text(&self) -> Option<String> {
        match self.to_metadata() {
            Ok(MetadataValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn to_integer(&self) -> Option<i64> {
        match self.to_metadata() {
            Ok(MetadataValue::Integer(i)) => Some(i),
            _ => None,
        }
    }
}
