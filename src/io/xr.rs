//! Labeled-array container files, laid out the way netCDF-4 lays out its
//! HDF5 files.
//!
//! Every dimension is a dimension scale in the root group: the coordinate
//! of the same name when there is one, otherwise a placeholder that holds
//! only a length. Other variables point at their scales through a
//! `DIMENSION_LIST` attribute, non-index coordinates are named in the root
//! `coordinates` attribute and units and other attributes are plain HDF5
//! attributes. The same file reads as ordinary datasets through
//! [`read_h5`](super::h5::read_h5).
//!
//! `REFERENCE_LIST` back-pointers on the scales are not written.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};

use super::hdf5::{reference_list, Attribute, Datatype, H5File, H5Writer, Object};
use super::path::normalize_xr_path;
use crate::data::{Attrs, Conflict, Dataset, Encoding, Variable};

const NC_PROPERTIES: &str = "_NCProperties";
const COORDINATES: &str = "coordinates";
const CLASS: &str = "CLASS";
const NAME: &str = "NAME";
const DIMID: &str = "_Netcdf4Dimid";
const DIMENSION_LIST: &str = "DIMENSION_LIST";
const DIMENSION_SCALE: &str = "DIMENSION_SCALE";

/// Attribute names managed by the container layout on variables.
const RESERVED: &[&str] = &[
    CLASS,
    NAME,
    DIMID,
    DIMENSION_LIST,
    "REFERENCE_LIST",
    "_Netcdf4Coordinates",
];
/// Attribute names managed by the container layout on the root group.
const RESERVED_GLOBAL: &[&str] = &[NC_PROPERTIES, COORDINATES];

/// `NAME` of a dimension scale that stands for a bare dimension.
const DIMENSION_ONLY: &str = "This is a netCDF dimension but not a netCDF variable.";

fn dimension_only_name(len: usize) -> String {
    format!("{DIMENSION_ONLY}{len:>10}")
}

/// Whether `object` is a placeholder scale holding a dimension length and
/// no values.
pub(crate) fn is_dimension_only(object: &Object<'_>) -> Result<bool> {
    if object.is_group() {
        return Ok(false);
    }
    Ok(object
        .attribute(NAME)?
        .and_then(|a| a.to_text())
        .is_some_and(|name| name.starts_with(DIMENSION_ONLY)))
}

/// Whether the HDF5 file at `path` was written as a labeled container.
pub fn is_container(path: impl AsRef<Path>) -> Result<bool> {
    let file = H5File::open(path.as_ref())?;
    Ok(file.root()?.attribute(NC_PROPERTIES)?.is_some())
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Merge into the existing file instead of replacing it.
    pub append: bool,
    /// What to do with names already present when appending.
    pub on_conflict: Conflict,
}

/// Write `ds` to `path`. Returns the normalized path that was written.
pub fn try_write_xr(path: impl AsRef<Path>, ds: &Dataset, options: &WriteOptions) -> Result<PathBuf> {
    let path = normalize_xr_path(path);

    if options.append && path.exists() {
        let mut merged = try_read_xr(&path).context("reading file to append to")?;
        merged
            .merge(ds, options.on_conflict)
            .context("appending to existing file")?;
        log::debug!("appending {} variable(s) to {}", ds.data_vars().len(), path.display());
        store(&path, &merged)?;
    } else {
        store(&path, ds)?;
    }
    Ok(path)
}

fn user_attrs(owner: &str, attrs: &Attrs, reserved: &[&str]) -> Result<Vec<Attribute>> {
    attrs
        .iter()
        .map(|(key, value)| {
            ensure!(
                !reserved.contains(&key.as_str()),
                "attribute '{key}' on '{owner}' is reserved by the file layout"
            );
            Ok(Attribute::metadata(key, value))
        })
        .collect()
}

/// Whether `coord` is the index coordinate of the dimension it is named
/// after.
fn is_scale(name: &str, coord: &Variable) -> bool {
    coord.dims() == [name]
}

fn store(path: &Path, ds: &Dataset) -> Result<()> {
    ds.encoding.validate()?;
    let level = ds.encoding.gzip_level;
    let mut w = H5Writer::new();
    let mut links: Vec<(String, u64)> = Vec::new();

    // Dimension scales first; every other variable refers to them.
    let mut scales: HashMap<&str, u64> = HashMap::new();
    let mut placeholders = Vec::new();
    for (dimid, (dim, &len)) in ds.dims().iter().enumerate() {
        let dimid = i32::try_from(dimid).context("too many dimensions")?;
        let address = match ds.coord(dim).filter(|c| is_scale(dim, c)) {
            Some(coord) => {
                let mut attrs = vec![
                    Attribute::text(CLASS, DIMENSION_SCALE),
                    Attribute::text(NAME, dim),
                    Attribute::int32(DIMID, dimid),
                ];
                attrs.extend(user_attrs(dim, coord.attrs(), RESERVED)?);
                w.dataset(coord.values(), &attrs, level)
                    .with_context(|| format!("storing '{dim}'"))?
            }
            None => {
                ensure!(
                    !ds.contains(dim),
                    "'{dim}' names both a dimension and a variable along other dimensions"
                );
                let attrs = [
                    Attribute::text(CLASS, DIMENSION_SCALE),
                    Attribute::text(NAME, &dimension_only_name(len)),
                    Attribute::int32(DIMID, dimid),
                ];
                let address = w.placeholder(Datatype::Float { size: 4 }, len, &attrs)?;
                placeholders.push((dim.clone(), address));
                address
            }
        };
        scales.insert(dim, address);
    }

    let others: Vec<(&String, &Variable)> = ds
        .coords()
        .iter()
        .filter(|(name, c)| !is_scale(name, c))
        .chain(ds.data_vars())
        .collect();

    // One heap object per (variable, dimension) pair, each holding the
    // address of the dimension's scale.
    let mut heap_objects = Vec::new();
    for (_, var) in &others {
        for dim in var.dims() {
            let scale = scales
                .get(dim.as_str())
                .with_context(|| format!("dimension '{dim}' has no scale"))?;
            heap_objects.push(scale.to_le_bytes().to_vec());
        }
    }
    let heap = if heap_objects.is_empty() {
        None
    } else {
        Some(w.global_heap(&heap_objects)?)
    };

    let mut next_object = 1u32;
    let mut written = HashMap::new();
    for (name, var) in &others {
        let mut attrs = user_attrs(name, var.attrs(), RESERVED)?;
        if let Some(heap) = heap.filter(|_| !var.dims().is_empty()) {
            let entries: Vec<(u32, u32)> = (0..var.dims().len() as u32)
                .map(|i| (1, next_object + i))
                .collect();
            next_object += entries.len() as u32;
            attrs.push(reference_list(DIMENSION_LIST, heap, &entries));
        }
        let address = w
            .dataset(var.values(), &attrs, level)
            .with_context(|| format!("storing '{name}'"))?;
        written.insert(name.as_str(), address);
    }

    // Root links keep coordinate order, then data variables, then bare
    // dimensions.
    for (name, coord) in ds.coords() {
        let address = if is_scale(name, coord) {
            scales.get(name.as_str()).copied()
        } else {
            written.get(name.as_str()).copied()
        };
        let address = address.with_context(|| format!("coordinate '{name}' was not written"))?;
        links.push((name.clone(), address));
    }
    for name in ds.data_vars().keys() {
        let address = written
            .get(name.as_str())
            .copied()
            .with_context(|| format!("variable '{name}' was not written"))?;
        links.push((name.clone(), address));
    }
    links.extend(placeholders);

    let mut globals = vec![Attribute::text(
        NC_PROPERTIES,
        &format!("version=2,astraeus={}", env!("CARGO_PKG_VERSION")),
    )];
    let auxiliary: Vec<&str> = ds
        .coords()
        .iter()
        .filter(|(name, c)| !is_scale(name, c))
        .map(|(name, _)| name.as_str())
        .collect();
    if !auxiliary.is_empty() {
        globals.push(Attribute::text(COORDINATES, &auxiliary.join(" ")));
    }
    globals.extend(user_attrs("/", &ds.attrs, RESERVED_GLOBAL)?);

    let root = w.group(&links, &globals)?;
    w.save(root, path)
}

/// Write `ds` to `path` (`.h5` is appended unless the path ends in `.h5`,
/// `.hdf5` or `.nc`), optionally appending to an existing file. Passing no
/// dataset is a failure. Returns `false` on any failure.
pub fn write_xr<'a>(
    path: impl AsRef<Path>,
    ds: impl Into<Option<&'a Dataset>>,
    verbose: bool,
    append: bool,
) -> bool {
    let options = WriteOptions {
        append,
        ..WriteOptions::default()
    };
    write_xr_with(path, ds, verbose, &options)
}

/// [`write_xr`] with full control over the append policy.
pub fn write_xr_with<'a>(
    path: impl AsRef<Path>,
    ds: impl Into<Option<&'a Dataset>>,
    verbose: bool,
    options: &WriteOptions,
) -> bool {
    let shown = normalize_xr_path(&path);
    let result = ds
        .into()
        .context("no dataset to write")
        .and_then(|ds| try_write_xr(&path, ds, options));
    match result {
        Ok(written) => {
            log::info!("Wrote dataset to {}", written.display());
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

/// Attributes of `object` minus the names in `reserved`. Values with more
/// than one element are skipped.
fn read_attrs(owner: &str, object: &Object<'_>, reserved: &[&str]) -> Result<Attrs> {
    let mut attrs = Attrs::new();
    for attr in object.attributes()? {
        if reserved.contains(&attr.name.as_str()) {
            continue;
        }
        match attr.to_metadata() {
            Ok(value) => {
                attrs.insert(attr.name, value);
            }
            Err(e) => log::warn!("skipping attribute on '{owner}': {e:#}"),
        }
    }
    Ok(attrs)
}

struct Scale {
    name: String,
    len: usize,
    dimid: i64,
    address: u64,
}

pub fn try_read_xr(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = normalize_xr_path(path);
    let file = H5File::open(&path)?;
    let root = file.root()?;
    let globals = root.attributes()?;
    if !globals.iter().any(|a| a.name == NC_PROPERTIES) {
        bail!("{} holds plain datasets, not a labeled container", path.display());
    }
    let auxiliary: HashSet<String> = globals
        .iter()
        .find(|a| a.name == COORDINATES)
        .and_then(Attribute::to_text)
        .map(|names| names.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let mut scales = Vec::new();
    let mut variables = Vec::new();
    for (name, address) in root.links()? {
        let object = file.object(address).with_context(|| format!("object '{name}'"))?;
        if object.is_group() {
            log::warn!("skipping group '{name}' in {}", path.display());
            continue;
        }
        let is_scale = object
            .attribute(CLASS)?
            .and_then(|a| a.to_text())
            .is_some_and(|class| class == DIMENSION_SCALE);
        if is_scale {
            let shape = object.shape()?;
            ensure!(shape.len() == 1, "dimension scale '{name}' is not one-dimensional");
            let dimid = match object.attribute(DIMID)? {
                Some(attr) => attr.to_integer().unwrap_or(i64::MAX),
                None => i64::MAX,
            };
            scales.push(Scale {
                len: shape[0],
                name: name.clone(),
                dimid,
                address,
            });
        }
        variables.push((name, object, is_scale));
    }
    scales.sort_by_key(|s| s.dimid);
    let dims: Vec<(String, usize)> = scales.iter().map(|s| (s.name.clone(), s.len)).collect();
    let by_address: HashMap<u64, &str> = scales.iter().map(|s| (s.address, s.name.as_str())).collect();

    let mut encoding = None;
    let mut coords = Vec::new();
    let mut data_vars = Vec::new();
    for (name, object, is_scale) in variables {
        if is_scale && is_dimension_only(&object)? {
            continue;
        }
        let var_dims = if is_scale {
            vec![name.clone()]
        } else {
            match object.attribute(DIMENSION_LIST)? {
                Some(attr) => file
                    .references(&attr)?
                    .into_iter()
                    .map(|refs| {
                        let address = refs.first().copied().unwrap_or_default();
                        by_address
                            .get(&address)
                            .map(|dim| dim.to_string())
                            .with_context(|| format!("'{name}' refers to an unknown dimension"))
                    })
                    .collect::<Result<Vec<_>>>()?,
                None => {
                    ensure!(
                        object.shape()?.is_empty(),
                        "'{name}' has no dimension list"
                    );
                    Vec::new()
                }
            }
        };
        if encoding.is_none() {
            if let Some(level) = object.deflate_level()? {
                encoding = Some(Encoding { gzip_level: level });
            }
        }

        let values = object.read().with_context(|| format!("reading '{name}'"))?;
        let attrs = read_attrs(&name, &object, RESERVED)?;
        let var = Variable::new(var_dims, values)
            .with_context(|| format!("restoring '{name}'"))?
            .with_attrs(attrs);
        if is_scale || auxiliary.contains(&name) {
            coords.push((name, var));
        } else {
            data_vars.push((name, var));
        }
    }

    let attrs = read_attrs("/", &root, RESERVED_GLOBAL)?;
    let ds = Dataset::from_parts(dims, coords, data_vars, attrs, encoding.unwrap_or_default())
        .context("rebuilding dataset")?;
    Ok(ds)
}

/// Read the container at `path`. Returns `None` on any failure.
pub fn read_xr(path: impl AsRef<Path>, verbose: bool) -> Option<Dataset> {
    let shown = normalize_xr_path(&path);
    match try_read_xr(&path) {
        Ok(ds) => {
            log::info!(
                "Loaded {} variable(s) from {}",
                ds.data_vars().len(),
                shown.display()
            );
            if verbose {
                println!("Finished loading parameters from {}", shown.display());
            }
            Some(ds)
        }
        Err(e) => {
            log::error!("Failed to load {}: {e:#}", shown.display());
            if verbose {
                println!("Failed to load parameters from {}", shown.display());
                println!("{e:#}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MetadataValue, NdArray};
    use ndarray::Array2;

    fn sample() -> Dataset {
        let mut ds = Dataset::new();
        ds.insert_coord("time", Variable::new(["time"], vec![0.5, 1.5]).unwrap())
            .unwrap();
        ds.set_attr("flux", vec![10.0, 11.0]).unwrap();
        ds.attrs.insert("target".into(), "WASP-39b".into());
        ds
    }

    #[test]
    fn layout_follows_netcdf_conventions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.nc");
        let mut ds = sample();
        ds.insert_var(
            "image",
            Variable::new(["row", "time"], Array2::<f32>::zeros((3, 2)))
                .unwrap()
                .with_attr("units", "e-"),
        )
        .unwrap();
        try_write_xr(&path, &ds, &WriteOptions::default()).unwrap();

        let file = H5File::open(&path).unwrap();
        let root = file.root().unwrap();
        assert!(root.attribute(NC_PROPERTIES).unwrap().is_some());
        assert_eq!(
            root.attribute("target").unwrap().unwrap().to_text().as_deref(),
            Some("WASP-39b")
        );

        let time = file.resolve("time").unwrap();
        assert_eq!(time.attribute(CLASS).unwrap().unwrap().to_text().as_deref(), Some(DIMENSION_SCALE));
        assert_eq!(time.attribute(DIMID).unwrap().unwrap().to_integer(), Some(0));

        let row = file.resolve("row").unwrap();
        assert!(is_dimension_only(&row).unwrap());
        assert_eq!(row.shape().unwrap(), [3]);

        let image = file.resolve("image").unwrap();
        let units = image.attribute("units").unwrap().unwrap();
        assert_eq!(units.to_metadata().unwrap(), MetadataValue::from("e-"));
        let dims = file
            .references(&image.attribute(DIMENSION_LIST).unwrap().unwrap())
            .unwrap();
        assert_eq!(dims, vec![vec![row.address], vec![time.address]]);
        assert_eq!(image.deflate_level().unwrap(), Some(ds.encoding.gzip_level));

        let back = try_read_xr(&path).unwrap();
        assert_eq!(back.dims().keys().collect::<Vec<_>>(), ["time", "row"]);
        assert!(back.coord("row").is_none());
        assert_eq!(back, ds);
    }

    #[test]
    fn gzip_level_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.h5");
        let mut ds = sample();
        ds.encoding.gzip_level = 9;
        try_write_xr(&path, &ds, &WriteOptions::default()).unwrap();
        assert_eq!(try_read_xr(&path).unwrap().encoding.gzip_level, 9);

        ds.encoding.gzip_level = 11;
        let err = try_write_xr(&path, &ds, &WriteOptions::default()).unwrap_err();
        assert!(format!("{err:#}").contains("gzip level 11"));
    }

    #[test]
    fn reserved_attribute_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = sample();
        ds.data_var_mut("flux")
            .unwrap()
            .attrs_mut()
            .insert(DIMENSION_LIST.into(), "x".into());
        assert!(try_write_xr(dir.path().join("a.h5"), &ds, &WriteOptions::default()).is_err());

        let mut ds = sample();
        ds.attrs.insert(NC_PROPERTIES.into(), "forged".into());
        assert!(try_write_xr(dir.path().join("b.h5"), &ds, &WriteOptions::default()).is_err());
    }

    #[test]
    fn variable_named_after_a_foreign_dimension_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = Dataset::new();
        ds.insert_var("x", Variable::new(["y"], vec![1.0, 2.0]).unwrap())
            .unwrap();
        ds.insert_var("z", Variable::new(["x"], vec![1.0, 2.0, 3.0]).unwrap())
            .unwrap();
        assert!(try_write_xr(dir.path().join("clash.h5"), &ds, &WriteOptions::default()).is_err());
    }

    #[test]
    fn scalar_variables_have_no_dimension_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalar.h5");
        let mut ds = sample();
        ds.insert_var("exptime", Variable::new(Vec::<String>::new(), 2.5).unwrap())
            .unwrap();
        try_write_xr(&path, &ds, &WriteOptions::default()).unwrap();

        let file = H5File::open(&path).unwrap();
        assert!(file.resolve("exptime").unwrap().attribute(DIMENSION_LIST).unwrap().is_none());
        assert_eq!(
            try_read_xr(&path).unwrap().data_var("exptime").unwrap().values(),
            &NdArray::from(2.5)
        );
    }

    #[test]
    fn plain_dataset_file_is_not_a_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.h5");
        let items: crate::io::h5::Data = [("a", vec![1.0])].into_iter().collect();
        crate::io::h5::try_write_h5(&path, &items).unwrap();
        let err = try_read_xr(&path).unwrap_err();
        assert!(err.to_string().contains("not a labeled container"));
    }

    #[test]
    fn append_to_missing_file_is_a_plain_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.nc");
        let options = WriteOptions {
            append: true,
            ..WriteOptions::default()
        };
        try_write_xr(&path, &sample(), &options).unwrap();
        let back = try_read_xr(&path).unwrap();
        assert_eq!(back.data_var("flux").unwrap().values(), &NdArray::from(vec![10.0, 11.0]));
    }
}
