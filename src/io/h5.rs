//! Plain key → array files.
//!
//! A file holds one deflated HDF5 dataset per key. Keys may contain `/`
//! to place datasets in nested groups.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use indexmap::IndexMap;

use super::hdf5::{H5File, H5Writer};
use super::path::normalize_h5_path;
use super::xr::is_dimension_only;
use crate::data::dataset::DEFAULT_GZIP_LEVEL;
use crate::data::NdArray;

// ---------------------------------------------------------------------------
// Data – a schema-free holder of named arrays
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    entries: BTreeMap<String, NdArray>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&NdArray> {
        self.entries.get(key)
    }

    /// Set or replace the entry `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<NdArray>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<NdArray> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NdArray)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Data
where
    K: Into<String>,
    V: Into<NdArray>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = Data::new();
        for (key, value) in iter {
            data.set(key, value);
        }
        data
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

enum Node<'a> {
    Leaf(&'a NdArray),
    Group(IndexMap<String, Node<'a>>),
}

/// Place `values` under its `/`-separated key. A leading `/` is ignored.
fn insert<'a>(root: &mut IndexMap<String, Node<'a>>, key: &str, values: &'a NdArray) -> Result<()> {
    let key = key.trim_start_matches('/');
    let segments: Vec<&str> = key.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        bail!("invalid dataset key '{key}'");
    }
    let (leaf, parents) = segments
        .split_last()
        .with_context(|| format!("invalid dataset key '{key}'"))?;

    let mut group = root;
    for name in parents {
        let node = group
            .entry(name.to_string())
            .or_insert_with(|| Node::Group(IndexMap::new()));
        group = match node {
            Node::Group(children) => children,
            Node::Leaf(_) => bail!("'{name}' in key '{key}' is both a dataset and a group"),
        };
    }
    if group.contains_key(*leaf) {
        bail!("key '{key}' is already used");
    }
    group.insert(leaf.to_string(), Node::Leaf(values));
    Ok(())
}

/// Write a group's children, then the group itself.
fn write_group(w: &mut H5Writer, children: &IndexMap<String, Node<'_>>) -> Result<u64> {
    let mut links = Vec::with_capacity(children.len());
    for (name, node) in children {
        let address = match node {
            Node::Leaf(values) => w
                .dataset(values, &[], DEFAULT_GZIP_LEVEL)
                .with_context(|| format!("storing '{name}'"))?,
            Node::Group(grandchildren) => write_group(w, grandchildren)?,
        };
        links.push((name.clone(), address));
    }
    w.group(&links, &[])
}

/// Write every entry of `items` to `path`, replacing any existing file.
/// Returns the normalized path that was written.
pub fn try_write_h5(path: impl AsRef<Path>, items: &Data) -> Result<PathBuf> {
    let path = normalize_h5_path(path);
    let mut tree = IndexMap::new();
    for (key, values) in items.iter() {
        insert(&mut tree, key, values)?;
        log::debug!("storing '{key}' {:?} {}", values.shape(), values.dtype());
    }
    let mut writer = H5Writer::new();
    let root = write_group(&mut writer, &tree)?;
    writer.save(root, &path)?;
    Ok(path)
}

/// Write `items` to `path` (`.h5` is appended unless the path ends in
/// `.h5` or `.hdf5`). Returns `false` on any failure.
pub fn write_h5(path: impl AsRef<Path>, items: &Data, verbose: bool) -> bool {
    let shown = normalize_h5_path(&path);
    match try_write_h5(&path, items) {
        Ok(written) => {
            log::info!("Wrote {} dataset(s) to {}", items.len(), written.display());
            if verbose {
                println!("Finished writing to {}", written.display());
            }
            true
        }
        Err(e) => {
            log::error!("Failed to write {}: {e:#}", shown.display());
            if verbose {
                println!("Failed to write to {}", shown.display());
                println!("{e:#}");
            }
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Every dataset path in the file at `path`, groups joined with `/`.
/// Dimensions without values of their own are left out.
pub fn list_h5(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = H5File::open(path.as_ref())?;
    let mut keys = Vec::new();
    for (key, object) in file.datasets()? {
        if !is_dimension_only(&object)? {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Read datasets from `path` into `data`.
///
/// Without `keys` every stored dataset is read. Entries are set one at a
/// time, so on error `data` keeps whatever was read before the failure.
pub fn try_read_h5(path: impl AsRef<Path>, data: &mut Data, keys: Option<&[&str]>) -> Result<PathBuf> {
    let path = normalize_h5_path(path);
    let file = H5File::open(&path)?;
    match keys {
        Some(keys) => {
            for key in keys {
                let object = file.resolve(key)?;
                ensure!(!object.is_group(), "'{key}' is a group, not a dataset");
                let values = object.read().with_context(|| format!("reading '{key}'"))?;
                log::debug!("loaded '{key}' {:?} {}", values.shape(), values.dtype());
                data.set(key.trim_start_matches('/'), values);
            }
        }
        None => {
            for (key, object) in file.datasets()? {
                if is_dimension_only(&object)? {
                    continue;
                }
                let values = object.read().with_context(|| format!("reading '{key}'"))?;
                log::debug!("loaded '{key}' {:?} {}", values.shape(), values.dtype());
                data.set(key, values);
            }
        }
    }
    Ok(path)
}

/// Read `path` into `data` (or a fresh holder). Returns the holder and
/// whether every requested dataset was read.
pub fn read_h5(
    path: impl AsRef<Path>,
    verbose: bool,
    data: Option<Data>,
    keys: Option<&[&str]>,
) -> (Data, bool) {
    let shown = normalize_h5_path(&path);
    let mut data = data.unwrap_or_default();
    match try_read_h5(&path, &mut data, keys) {
        Ok(read) => {
            log::info!("Loaded {} dataset(s) from {}", data.len(), read.display());
            if verbose {
                println!("Finished loading parameters from {}", read.display());
            }
            (data, true)
        }
        Err(e) => {
            log::error!("Failed to load {}: {e:#}", shown.display());
            if verbose {
                println!("Failed to load parameters from {}", shown.display());
                println!("{e:#}");
            }
            (data, false)
        }
    }
}
