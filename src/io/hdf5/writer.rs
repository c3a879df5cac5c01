use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::format::{
    deflate_pipeline, encode_global_heap, encode_object_header, encode_superblock, group_info_message,
    link_info_message, link_message, Attribute, Dataspace, Datatype, Layout, Message, MSG_DATASPACE,
    MSG_DATATYPE, MSG_FILL_VALUE, SUPERBLOCK_SIZE, UNDEFINED,
};
use super::value::encode_array;
use crate::data::NdArray;

/// Builds an HDF5 file in memory.
///
/// Objects are appended as they are written and identified by their
/// object header address, so children go before the groups linking to
/// them and the root group goes last.
pub struct H5Writer {
    buf: Vec<u8>,
}

impl Default for H5Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl H5Writer {
    pub fn new() -> Self {
        // The superblock is filled in by `finish`.
        Self {
            buf: vec![0; SUPERBLOCK_SIZE],
        }
    }

    fn append(&mut self, bytes: &[u8]) -> u64 {
        let address = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        address
    }

    fn object(&mut self, messages: &[Message]) -> Result<u64> {
        let header = encode_object_header(messages)?;
        Ok(self.append(&header))
    }

    /// Write `values` as a dataset. Arrays with at least one element and
    /// one axis are deflated at `gzip_level` as a single chunk.
    pub fn dataset(&mut self, values: &NdArray, attrs: &[Attribute], gzip_level: u32) -> Result<u64> {
        ensure!(gzip_level <= 9, "gzip level {gzip_level} is outside 0..=9");
        let (datatype, raw) = encode_array(values);
        let shape: Vec<u64> = values.shape().iter().map(|&n| n as u64).collect();

        let mut messages = vec![
            Message::constant(MSG_DATASPACE, Dataspace::of_shape(values.shape()).encode()),
            Message::constant(MSG_DATATYPE, datatype.encode()),
            fill_value_message(),
        ];
        if values.is_empty() {
            messages.push(Layout::contiguous(UNDEFINED, 0));
        } else if shape.is_empty() {
            let address = self.append(&raw);
            messages.push(Layout::contiguous(address, raw.len() as u64));
        } else {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(gzip_level));
            encoder.write_all(&raw).context("compressing dataset")?;
            let packed = encoder.finish().context("compressing dataset")?;
            let address = self.append(&packed);
            messages.push(Layout::single_chunk(&shape, datatype.size(), address, packed.len() as u64));
            messages.push(deflate_pipeline(gzip_level));
        }
        messages.extend(attrs.iter().map(Attribute::encode));
        self.object(&messages)
    }

    /// A dataset of `len` elements whose storage is never allocated.
    /// Reads return zeros.
    pub fn placeholder(&mut self, datatype: Datatype, len: usize, attrs: &[Attribute]) -> Result<u64> {
        let mut messages = vec![
            Message::constant(MSG_DATASPACE, Dataspace::of_shape(&[len]).encode()),
            Message::constant(MSG_DATATYPE, datatype.encode()),
            fill_value_message(),
            Layout::contiguous(UNDEFINED, 0),
        ];
        messages.extend(attrs.iter().map(Attribute::encode));
        self.object(&messages)
    }

    /// A group holding hard `links` to objects already written.
    pub fn group(&mut self, links: &[(String, u64)], attrs: &[Attribute]) -> Result<u64> {
        let mut messages = vec![link_info_message(), group_info_message()];
        messages.extend(links.iter().map(|(name, address)| link_message(name, *address)));
        messages.extend(attrs.iter().map(Attribute::encode));
        self.object(&messages)
    }

    /// A global heap collection; objects are numbered from 1 in order.
    pub fn global_heap(&mut self, objects: &[Vec<u8>]) -> Result<u64> {
        let heap = encode_global_heap(objects)?;
        Ok(self.append(&heap))
    }

    pub fn finish(mut self, root: u64) -> Vec<u8> {
        let superblock = encode_superblock(root, self.buf.len() as u64);
        self.buf[..SUPERBLOCK_SIZE].copy_from_slice(&superblock);
        self.buf
    }

    /// Finish and replace whatever is at `path`.
    pub fn save(self, root: u64, path: &Path) -> Result<()> {
        let bytes = self.finish(root);
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }
}

/// Fill value message: allocate late, write fill only if one is defined.
fn fill_value_message() -> Message {
    Message::constant(MSG_FILL_VALUE, vec![3, 0x0a])
}

/// Object references packed as the element bytes of a variable-length
/// sequence attribute: one `(count, heap object)` pair per element.
pub fn reference_list(name: &str, heap: u64, entries: &[(u32, u32)]) -> Attribute {
    let mut raw = Vec::with_capacity(entries.len() * 16);
    for &(count, index) in entries {
        raw.extend_from_slice(&count.to_le_bytes());
        raw.extend_from_slice(&heap.to_le_bytes());
        raw.extend_from_slice(&index.to_le_bytes());
    }
    Attribute {
        name: name.to_string(),
        datatype: Datatype::Sequence(Box::new(Datatype::Reference)),
        space: Dataspace::Simple(vec![entries.len() as u64]),
        raw,
    }
}
