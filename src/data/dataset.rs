use std::fmt;

use indexmap::IndexMap;
use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};

use super::array::NdArray;
use super::error::{DatasetError, Result};
use super::model::{Attrs, MetadataValue};

/// Gzip level applied when a dataset does not ask for another one.
pub const DEFAULT_GZIP_LEVEL: u32 = 4;

// ---------------------------------------------------------------------------
// Encoding – storage settings carried by a dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    /// Gzip level, 0..=9.
    pub gzip_level: u32,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            gzip_level: DEFAULT_GZIP_LEVEL,
        }
    }
}

impl Encoding {
    pub fn validate(&self) -> Result<()> {
        if self.gzip_level > 9 {
            return Err(DatasetError::GzipLevel(self.gzip_level));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Variable – an array tagged with dimension names
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    values: NdArray,
    attrs: Attrs,
}

impl Variable {
    /// Tag `values` with `dims`; there must be one name per axis.
    pub fn new<I, S>(dims: I, values: impl Into<NdArray>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        let values = values.into();
        if dims.len() != values.ndim() {
            return Err(DatasetError::RankMismatch {
                dims,
                ndim: values.ndim(),
            });
        }
        Ok(Self {
            dims,
            values,
            attrs: Attrs::new(),
        })
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn values(&self) -> &NdArray {
        &self.values
    }

    pub fn into_values(self) -> NdArray {
        self.values
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Attrs {
        &mut self.attrs
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    /// Length along `dim`, if this variable spans it.
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.dims
            .iter()
            .position(|d| d == dim)
            .map(|axis| self.shape()[axis])
    }

    /// Same dims and values; attributes are not compared.
    pub fn same_values(&self, other: &Variable) -> bool {
        self.dims == other.dims && self.values == other.values
    }

    pub(crate) fn replace_values(&mut self, dims: Vec<String>, values: NdArray) {
        self.dims = dims;
        self.values = values;
    }
}

// ---------------------------------------------------------------------------
// DataArray – a named variable together with the coordinates indexing it
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    name: Option<String>,
    variable: Variable,
    coords: IndexMap<String, Variable>,
}

impl DataArray {
    pub fn new(variable: Variable) -> Self {
        Self {
            name: None,
            variable,
            coords: IndexMap::new(),
        }
    }

    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = name.map(str::to_string);
        self
    }

    /// Attach a 1-D coordinate. Its dimension must be one of the array's
    /// dimensions and have the same length.
    pub fn with_coord(mut self, name: &str, coord: Variable) -> Result<Self> {
        let dim = coordinate_dim(name, &coord)?;
        let expected = self
            .variable
            .dim_len(dim)
            .ok_or_else(|| DatasetError::MissingDimension(dim.to_string()))?;
        let found = coord.shape()[0];
        if found != expected {
            return Err(DatasetError::LengthMismatch {
                name: name.to_string(),
                dim: dim.to_string(),
                expected,
                found,
            });
        }
        self.coords.insert(name.to_string(), coord);
        Ok(self)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dims(&self) -> &[String] {
        self.variable.dims()
    }

    pub fn values(&self) -> &NdArray {
        self.variable.values()
    }

    pub fn attrs(&self) -> &Attrs {
        self.variable.attrs()
    }

    pub fn attrs_mut(&mut self) -> &mut Attrs {
        self.variable.attrs_mut()
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    pub fn coord(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name)
    }

    pub fn coord_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.coords.get_mut(name)
    }

    pub fn coords(&self) -> &IndexMap<String, Variable> {
        &self.coords
    }
}

// ---------------------------------------------------------------------------
// Assignment adapter support
// ---------------------------------------------------------------------------

/// A value handed to [`Dataset::set_attr`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Array(NdArray),
    Attrs(Attrs),
    Encoding(Encoding),
}

impl From<NdArray> for FieldValue {
    fn from(values: NdArray) -> Self {
        FieldValue::Array(values)
    }
}

impl From<Attrs> for FieldValue {
    fn from(attrs: Attrs) -> Self {
        FieldValue::Attrs(attrs)
    }
}

impl From<Encoding> for FieldValue {
    fn from(encoding: Encoding) -> Self {
        FieldValue::Encoding(encoding)
    }
}

macro_rules! field_value_from_array {
    ($($ty:ty),*) => {$(
        impl<D: Dimension> From<Array<$ty, D>> for FieldValue {
            fn from(a: Array<$ty, D>) -> Self {
                FieldValue::Array(a.into())
            }
        }

        impl From<Vec<$ty>> for FieldValue {
            fn from(v: Vec<$ty>) -> Self {
                FieldValue::Array(v.into())
            }
        }
    )*};
}

field_value_from_array!(f64, f32, i64, i32, i16, i8, u64, u32, u16, u8, bool, String);

/// How to resolve a name that is already taken when merging datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conflict {
    /// Refuse to merge.
    #[default]
    Error,
    /// The incoming variable replaces the existing one.
    Overwrite,
}

// ---------------------------------------------------------------------------
// Dataset – a labeled-array container
// ---------------------------------------------------------------------------

/// Coordinates and data variables sharing one table of named dimensions.
///
/// Dimension order is the order in which dimensions were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    dims: IndexMap<String, usize>,
    coords: IndexMap<String, Variable>,
    data_vars: IndexMap<String, Variable>,
    /// Global attributes.
    pub attrs: Attrs,
    /// Storage settings used when the dataset is written.
    pub encoding: Encoding,
}

impl Dataset {
    /// Names that [`Dataset::set_attr`] treats as fields rather than
    /// variables.
    pub const DECLARED_FIELDS: &'static [&'static str] = &["attrs", "encoding"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn declares_field(name: &str) -> bool {
        Self::DECLARED_FIELDS.contains(&name)
    }

    /// Attribute-style assignment.
    ///
    /// A declared field (`attrs`, `encoding`) is set directly. Any other
    /// name becomes a data variable spanning every current dimension, in
    /// dimension order; an existing data variable of that name is replaced.
    pub fn set_attr(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        if Self::declares_field(name) {
            return self.set_declared(name, value);
        }
        match value {
            FieldValue::Array(values) => {
                let dims: Vec<String> = self.dims.keys().cloned().collect();
                let var = Variable::new(dims, values)?;
                self.insert_var(name, var)
            }
            _ => Err(DatasetError::FieldType {
                field: name.to_string(),
                expected: "an array",
            }),
        }
    }

    fn set_declared(&mut self, name: &str, value: FieldValue) -> Result<()> {
        match (name, value) {
            ("attrs", FieldValue::Attrs(attrs)) => self.attrs = attrs,
            ("encoding", FieldValue::Encoding(encoding)) => {
                encoding.validate()?;
                self.encoding = encoding;
            }
            ("encoding", _) => {
                return Err(DatasetError::FieldType {
                    field: name.to_string(),
                    expected: "an Encoding",
                })
            }
            _ => {
                return Err(DatasetError::FieldType {
                    field: name.to_string(),
                    expected: "an attribute map",
                })
            }
        }
        Ok(())
    }

    pub fn dims(&self) -> &IndexMap<String, usize> {
        &self.dims
    }

    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.dims.get(dim).copied()
    }

    pub fn coords(&self) -> &IndexMap<String, Variable> {
        &self.coords
    }

    pub fn data_vars(&self) -> &IndexMap<String, Variable> {
        &self.data_vars
    }

    pub fn coord(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name)
    }

    pub fn data_var(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name)
    }

    pub fn data_var_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.data_vars.get_mut(name)
    }

    /// Look a name up among data variables, then coordinates.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name).or_else(|| self.coords.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace a 1-D coordinate.
    pub fn insert_coord(&mut self, name: &str, coord: Variable) -> Result<()> {
        validate_name(name)?;
        coordinate_dim(name, &coord)?;
        if self.data_vars.contains_key(name) {
            return Err(DatasetError::DuplicateName(name.to_string()));
        }
        self.check_dims(name, &coord)?;
        self.register_dims(&coord);
        self.coords.insert(name.to_string(), coord);
        Ok(())
    }

    /// Insert or replace a data variable.
    pub fn insert_var(&mut self, name: &str, var: Variable) -> Result<()> {
        validate_name(name)?;
        if self.coords.contains_key(name) {
            return Err(DatasetError::DuplicateName(name.to_string()));
        }
        self.check_dims(name, &var)?;
        self.register_dims(&var);
        self.data_vars.insert(name.to_string(), var);
        Ok(())
    }

    /// Insert a labeled array and its coordinates. Coordinates already
    /// present must hold the same values.
    pub fn insert_array(&mut self, name: &str, array: DataArray) -> Result<()> {
        validate_name(name)?;
        if self.coords.contains_key(name) {
            return Err(DatasetError::DuplicateName(name.to_string()));
        }
        for (coord_name, coord) in &array.coords {
            if let Some(existing) = self.coords.get(coord_name) {
                if !existing.same_values(coord) {
                    return Err(DatasetError::CoordinateConflict(coord_name.clone()));
                }
            } else if self.data_vars.contains_key(coord_name) || coord_name == name {
                return Err(DatasetError::DuplicateName(coord_name.clone()));
            }
            self.check_dims(coord_name, coord)?;
        }
        self.check_dims(name, &array.variable)?;

        let DataArray {
            variable, coords, ..
        } = array;
        for (coord_name, coord) in coords {
            if !self.coords.contains_key(&coord_name) {
                self.register_dims(&coord);
                self.coords.insert(coord_name, coord);
            }
        }
        self.register_dims(&variable);
        self.data_vars.insert(name.to_string(), variable);
        Ok(())
    }

    /// Remove a data variable or coordinate, dropping dimensions nothing
    /// spans anymore.
    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        let removed = self
            .data_vars
            .shift_remove(name)
            .or_else(|| self.coords.shift_remove(name));
        if removed.is_some() {
            self.prune_dims();
        }
        removed
    }

    /// View a data variable as a labeled array carrying every coordinate
    /// whose dimension it spans.
    pub fn data_array(&self, name: &str) -> Option<DataArray> {
        let variable = self.data_vars.get(name)?.clone();
        let coords = self
            .coords
            .iter()
            .filter(|(_, c)| variable.dims().contains(&c.dims()[0]))
            .map(|(n, c)| (n.clone(), c.clone()))
            .collect();
        Some(DataArray {
            name: Some(name.to_string()),
            variable,
            coords,
        })
    }

    /// Merge `other` into `self`.
    ///
    /// Equal coordinates are shared. A differing coordinate or a data
    /// variable present in both is an error under [`Conflict::Error`] and
    /// taken from `other` under [`Conflict::Overwrite`]. Global attributes
    /// already present are kept unless overwriting. On error `self` is left
    /// untouched.
    pub fn merge(&mut self, other: &Dataset, on_conflict: Conflict) -> Result<()> {
        let mut merged = self.clone();

        for (name, coord) in &other.coords {
            match merged.coords.get(name).map(|existing| existing.same_values(coord)) {
                Some(true) => continue,
                Some(false) if on_conflict == Conflict::Error => {
                    return Err(DatasetError::CoordinateConflict(name.clone()));
                }
                Some(false) => {
                    merged.coords.shift_remove(name);
                    merged.prune_dims();
                }
                None => {}
            }
            merged.insert_coord(name, coord.clone())?;
        }

        for (name, var) in &other.data_vars {
            if merged.data_vars.contains_key(name) {
                if on_conflict == Conflict::Error {
                    return Err(DatasetError::DuplicateName(name.clone()));
                }
                merged.data_vars.shift_remove(name);
                merged.prune_dims();
            }
            merged.insert_var(name, var.clone())?;
        }

        for (key, value) in &other.attrs {
            match on_conflict {
                Conflict::Error => {
                    merged.attrs.entry(key.clone()).or_insert_with(|| value.clone());
                }
                Conflict::Overwrite => {
                    merged.attrs.insert(key.clone(), value.clone());
                }
            }
        }

        *self = merged;
        Ok(())
    }

    fn check_dims(&self, name: &str, var: &Variable) -> Result<()> {
        for (dim, &found) in var.dims().iter().zip(var.shape()) {
            if let Some(&expected) = self.dims.get(dim) {
                if expected != found {
                    return Err(DatasetError::LengthMismatch {
                        name: name.to_string(),
                        dim: dim.clone(),
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    fn register_dims(&mut self, var: &Variable) {
        for (dim, &len) in var.dims().iter().zip(var.shape()) {
            self.dims.entry(dim.clone()).or_insert(len);
        }
    }

    fn prune_dims(&mut self) {
        let in_use = |dim: &String| {
            self.coords
                .values()
                .chain(self.data_vars.values())
                .any(|v| v.dims().contains(dim))
        };
        let unused: Vec<String> = self
            .dims
            .keys()
            .filter(|d| !in_use(*d))
            .cloned()
            .collect();
        for dim in unused {
            self.dims.shift_remove(&dim);
        }
    }

    /// Rebuild a dataset from already-validated parts, re-checking every
    /// invariant along the way. Dimension order follows `dims` first.
    pub(crate) fn from_parts(
        dims: Vec<(String, usize)>,
        coords: Vec<(String, Variable)>,
        data_vars: Vec<(String, Variable)>,
        attrs: Attrs,
        encoding: Encoding,
    ) -> Result<Self> {
        let mut ds = Dataset {
            dims: dims.into_iter().collect(),
            attrs,
            encoding,
            ..Dataset::default()
        };
        for (name, coord) in coords {
            ds.insert_coord(&name, coord)?;
        }
        for (name, var) in data_vars {
            ds.insert_var(&name, var)?;
        }
        ds.prune_dims();
        Ok(ds)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(DatasetError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn coordinate_dim<'a>(name: &str, coord: &'a Variable) -> Result<&'a str> {
    match coord.dims() {
        [dim] => Ok(dim),
        dims => Err(DatasetError::CoordinateRank {
            name: name.to_string(),
            ndim: dims.len(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Text summary
// ---------------------------------------------------------------------------

fn write_variable(f: &mut fmt::Formatter<'_>, marker: &str, name: &str, v: &Variable) -> fmt::Result {
    writeln!(
        f,
        "  {marker} {name:<12} ({}) {} {:?}",
        v.dims().join(", "),
        v.values().dtype(),
        v.shape()
    )?;
    for (key, value) in v.attrs() {
        writeln!(f, "        {key}: {value}")?;
    }
    Ok(())
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<astraeus.Dataset>")?;
        let dims: Vec<String> = self.dims.iter().map(|(d, n)| format!("{d}: {n}")).collect();
        writeln!(f, "Dimensions:  ({})", dims.join(", "))?;
        writeln!(f, "Coordinates:")?;
        for (name, coord) in &self.coords {
            let marker = if coord.dims()[0] == *name { "*" } else { " " };
            write_variable(f, marker, name, coord)?;
        }
        writeln!(f, "Data variables:")?;
        for (name, var) in &self.data_vars {
            write_variable(f, " ", name, var)?;
        }
        if !self.attrs.is_empty() {
            writeln!(f, "Attributes:")?;
            for (key, value) in &self.attrs {
                writeln!(f, "    {key}: {value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array2};

    fn time_dataset() -> Dataset {
        let mut ds = Dataset::new();
        let time = Variable::new(["time"], vec![0.0, 1.0, 2.0]).unwrap();
        ds.insert_coord("time", time).unwrap();
        ds
    }

    #[test]
    fn assignment_creates_variable_over_current_dims() {
        let mut ds = time_dataset();
        ds.set_attr("temperature", arr1(&[40.1, 40.3, 40.2])).unwrap();

        let var = ds.data_var("temperature").unwrap();
        assert_eq!(var.dims(), ["time"]);
        assert_eq!(var.values(), &NdArray::from(vec![40.1, 40.3, 40.2]));
    }

    #[test]
    fn assignment_to_declared_field_sets_the_field() {
        let mut ds = time_dataset();
        let mut attrs = Attrs::new();
        attrs.insert("title".into(), "WASP-39b".into());
        ds.set_attr("attrs", attrs.clone()).unwrap();
        ds.set_attr("encoding", Encoding { gzip_level: 9 }).unwrap();

        assert_eq!(ds.attrs, attrs);
        assert_eq!(ds.encoding.gzip_level, 9);
        assert!(!ds.contains("attrs"));
        assert!(!ds.contains("encoding"));
    }

    #[test]
    fn wrong_type_for_declared_field_is_reported() {
        let mut ds = time_dataset();
        let err = ds.set_attr("attrs", vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, DatasetError::FieldType { .. }));
        assert!(ds.attrs.is_empty());
    }

    #[test]
    fn gzip_level_above_nine_is_rejected() {
        let mut ds = time_dataset();
        let err = ds.set_attr("encoding", Encoding { gzip_level: 12 }).unwrap_err();
        assert!(matches!(err, DatasetError::GzipLevel(12)));
        assert_eq!(ds.encoding, Encoding::default());
        ds.set_attr("encoding", Encoding { gzip_level: 0 }).unwrap();
        assert_eq!(ds.encoding.gzip_level, 0);
    }

    #[test]
    fn unsigned_assignment_keeps_dtype() {
        let mut ds = time_dataset();
        ds.set_attr("counts", vec![3u32, 4, 5]).unwrap();
        assert_eq!(ds.data_var("counts").unwrap().values().dtype(), crate::data::DType::UInt32);
    }

    #[test]
    fn assignment_with_wrong_rank_propagates() {
        let mut ds = time_dataset();
        let err = ds
            .set_attr("image", Array2::<f64>::zeros((3, 2)))
            .unwrap_err();
        assert!(matches!(err, DatasetError::RankMismatch { .. }));
    }

    #[test]
    fn assignment_with_wrong_length_propagates() {
        let mut ds = time_dataset();
        let err = ds.set_attr("temperature", vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, DatasetError::LengthMismatch { .. }));
    }

    #[test]
    fn reassignment_replaces() {
        let mut ds = time_dataset();
        ds.set_attr("t", vec![1i64, 2, 3]).unwrap();
        ds.set_attr("t", vec![4i64, 5, 6]).unwrap();
        assert_eq!(ds.data_var("t").unwrap().values(), &NdArray::from(vec![4i64, 5, 6]));
        assert_eq!(ds.data_vars().len(), 1);
    }

    #[test]
    fn coordinate_names_cannot_become_variables() {
        let mut ds = time_dataset();
        let err = ds.set_attr("time", vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateName(_)));
    }

    #[test]
    fn merge_shares_equal_coordinates() {
        let mut a = time_dataset();
        a.set_attr("foo", vec![1.0, 2.0, 3.0]).unwrap();
        let mut b = time_dataset();
        b.set_attr("bar", vec![4.0, 5.0, 6.0]).unwrap();

        a.merge(&b, Conflict::Error).unwrap();
        assert_eq!(a.data_vars().len(), 2);
        assert_eq!(a.coords().len(), 1);
    }

    #[test]
    fn merge_duplicate_variable_follows_policy() {
        let mut a = time_dataset();
        a.set_attr("foo", vec![1.0, 2.0, 3.0]).unwrap();
        let mut b = time_dataset();
        b.set_attr("foo", vec![7.0, 8.0, 9.0]).unwrap();

        let before = a.clone();
        assert!(matches!(
            a.merge(&b, Conflict::Error),
            Err(DatasetError::DuplicateName(_))
        ));
        assert_eq!(a, before);

        a.merge(&b, Conflict::Overwrite).unwrap();
        assert_eq!(a.data_var("foo").unwrap().values(), &NdArray::from(vec![7.0, 8.0, 9.0]));
    }

    #[test]
    fn merge_conflicting_coordinate_is_an_error() {
        let mut a = time_dataset();
        let mut b = Dataset::new();
        b.insert_coord("time", Variable::new(["time"], vec![5.0, 6.0, 7.0]).unwrap())
            .unwrap();
        assert!(matches!(
            a.merge(&b, Conflict::Error),
            Err(DatasetError::CoordinateConflict(_))
        ));
        a.merge(&b, Conflict::Overwrite).unwrap();
        assert_eq!(a.coord("time").unwrap().values(), &NdArray::from(vec![5.0, 6.0, 7.0]));
    }

    #[test]
    fn remove_drops_unused_dimensions() {
        let mut ds = time_dataset();
        ds.insert_var("w", Variable::new(["wavelength"], vec![1.0, 2.0]).unwrap())
            .unwrap();
        assert_eq!(ds.dims().len(), 2);
        ds.remove("w");
        assert_eq!(ds.dims().keys().collect::<Vec<_>>(), ["time"]);
    }

    #[test]
    fn names_with_slashes_are_rejected() {
        let mut ds = time_dataset();
        let err = ds.set_attr("a/b", vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidName(_)));
    }

    #[test]
    fn data_array_carries_its_coordinates() {
        let mut ds = time_dataset();
        ds.set_attr("flux", vec![1.0, 2.0, 3.0]).unwrap();
        ds.insert_var("w", Variable::new(["wavelength"], vec![1.0, 2.0]).unwrap())
            .unwrap();
        let da = ds.data_array("flux").unwrap();
        assert_eq!(da.name(), Some("flux"));
        assert!(da.coord("time").is_some());
        assert_eq!(da.coords().len(), 1);
    }
}
