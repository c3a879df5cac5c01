//! Arrow view of a [`Data`] holder, for printing and for exporting to
//! Parquet.
//!
//! Every key becomes a one-row `List<T>` column holding the flattened
//! (row-major) values; shapes travel in the `astraeus.shapes` key/value
//! entry of an exported file.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array,
    ListArray, StringArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use super::h5::Data;
use crate::data::NdArray;

/// JSON map from key to shape, stored with exported files.
pub const SHAPES_KEY: &str = "astraeus.shapes";

/// One-row list column holding the flattened values.
fn list_column(values: &NdArray) -> Result<ArrayRef> {
    let flat: ArrayRef = match values {
        NdArray::Float64(a) => Arc::new(Float64Array::from_iter_values(a.iter().copied())),
        NdArray::Float32(a) => Arc::new(Float32Array::from_iter_values(a.iter().copied())),
        NdArray::Int64(a) => Arc::new(Int64Array::from_iter_values(a.iter().copied())),
        NdArray::Int32(a) => Arc::new(Int32Array::from_iter_values(a.iter().copied())),
        NdArray::Int16(a) => Arc::new(Int16Array::from_iter_values(a.iter().copied())),
        NdArray::Int8(a) => Arc::new(Int8Array::from_iter_values(a.iter().copied())),
        NdArray::UInt64(a) => Arc::new(UInt64Array::from_iter_values(a.iter().copied())),
        NdArray::UInt32(a) => Arc::new(UInt32Array::from_iter_values(a.iter().copied())),
        NdArray::UInt16(a) => Arc::new(UInt16Array::from_iter_values(a.iter().copied())),
        NdArray::UInt8(a) => Arc::new(UInt8Array::from_iter_values(a.iter().copied())),
        NdArray::Bool(a) => Arc::new(a.iter().map(|&b| Some(b)).collect::<BooleanArray>()),
        NdArray::Utf8(a) => Arc::new(StringArray::from_iter_values(a.iter())),
    };
    let item = Arc::new(Field::new("item", flat.data_type().clone(), true));
    let offsets = OffsetBuffer::from_lengths([flat.len()]);
    let list = ListArray::try_new(item, offsets, flat, None).context("building list column")?;
    Ok(Arc::new(list))
}

/// A single-row batch with one column per key, named by the full
/// `/`-joined key.
pub fn to_record_batch(data: &Data) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(data.len());
    let mut columns = Vec::with_capacity(data.len());
    for (key, values) in data.iter() {
        let column = list_column(values).with_context(|| format!("converting '{key}'"))?;
        fields.push(Field::new(key, column.data_type().clone(), false));
        columns.push(column);
    }
    if columns.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context("assembling record batch")
}

/// Export `data` to a gzip-compressed Parquet file at `path`.
pub fn write_parquet(path: &Path, data: &Data, gzip_level: u32) -> Result<()> {
    let batch = to_record_batch(data)?;
    let shapes: BTreeMap<&str, &[usize]> = data.iter().map(|(k, v)| (k, v.shape())).collect();
    let level = GzipLevel::try_new(gzip_level)
        .with_context(|| format!("invalid gzip level {gzip_level}"))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::GZIP(level))
        .set_key_value_metadata(Some(vec![KeyValue::new(
            SHAPES_KEY.to_string(),
            serde_json::to_string(&shapes).context("encoding shapes")?,
        )]))
        .build();

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).context("opening parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("finishing parquet file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{DataType, UInt32Type};
    use ndarray::arr2;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn sample() -> Data {
        [
            ("fit/flux", NdArray::from(arr2(&[[1u32, 2], [3, 4]]))),
            ("flags", NdArray::from(vec![true, false])),
            ("names", NdArray::from(vec!["rp", "t0"])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn every_key_is_a_list_column() {
        let batch = to_record_batch(&sample()).unwrap();
        assert_eq!(batch.num_rows(), 1);
        let names: Vec<&str> = batch.schema_ref().fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["fit/flux", "flags", "names"]);

        let flux = batch.column(0).as_list::<i32>().value(0);
        assert_eq!(flux.data_type(), &DataType::UInt32);
        assert_eq!(flux.as_primitive::<UInt32Type>().values().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn empty_holder_has_no_columns() {
        let batch = to_record_batch(&Data::new()).unwrap();
        assert_eq!(batch.num_columns(), 0);
    }

    #[test]
    fn export_records_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.parquet");
        write_parquet(&path, &sample(), 6).unwrap();

        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap()).unwrap();
        let shapes = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kv| kv.iter().find(|e| e.key == SHAPES_KEY))
            .and_then(|e| e.value.clone())
            .unwrap();
        assert_eq!(shapes, r#"{"fit/flux":[2,2],"flags":[2],"names":[2]}"#);
        let rows: usize = builder.build().unwrap().map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 1);
    }
}
