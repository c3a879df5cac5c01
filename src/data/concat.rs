use indexmap::{IndexMap, IndexSet};

use super::array::NdArray;
use super::dataset::{Dataset, Variable};
use super::error::{DatasetError, Result};
use super::factory::TIME;

/// Which variables get concatenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// Only variables that already span the concatenation dimension.
    #[default]
    Minimal,
    /// Also variables whose values differ between datasets.
    Different,
    /// Every variable; those without the dimension are broadcast along it.
    All,
}

/// How variables that are not concatenated are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compat {
    /// Values and attributes must match.
    Identical,
    /// Values must match.
    Equals,
    /// Values must match wherever neither side is NaN.
    NoConflicts,
    /// Take the first dataset's variable without checking.
    #[default]
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatOptions {
    pub dim: String,
    pub data_vars: Selection,
    pub coords: Selection,
    pub compat: Compat,
}

impl Default for ConcatOptions {
    fn default() -> Self {
        Self {
            dim: TIME.to_string(),
            data_vars: Selection::default(),
            coords: Selection::default(),
            compat: Compat::default(),
        }
    }
}

impl ConcatOptions {
    pub fn along(dim: &str) -> Self {
        Self {
            dim: dim.to_string(),
            ..Self::default()
        }
    }
}

/// Concatenate datasets along `options.dim`.
///
/// If no dataset has the dimension, a new leading dimension with one entry
/// per dataset is created. Global attributes and encoding come from the
/// first dataset.
pub fn concat(datasets: &[Dataset], options: &ConcatOptions) -> Result<Dataset> {
    let first = datasets.first().ok_or(DatasetError::EmptyConcat)?;
    let dim = options.dim.as_str();

    let with_dim = datasets.iter().filter(|ds| ds.dims().contains_key(dim)).count();
    let new_dim = match with_dim {
        0 => true,
        n if n == datasets.len() => false,
        _ => return Err(DatasetError::PartialDimension(dim.to_string())),
    };
    let joined_len = if new_dim {
        datasets.len()
    } else {
        datasets.iter().filter_map(|ds| ds.dim_len(dim)).sum()
    };

    let mut dims = Vec::new();
    if new_dim {
        dims.push((dim.to_string(), joined_len));
    }
    for (name, &len) in first.dims() {
        let len = if name == dim { joined_len } else { len };
        dims.push((name.clone(), len));
    }

    let ctx = Context {
        datasets,
        dim,
        new_dim,
        compat: options.compat,
    };
    let coords = ctx.combine_all(|ds| ds.coords(), options.coords)?;
    let data_vars = ctx.combine_all(|ds| ds.data_vars(), options.data_vars)?;

    log::debug!(
        "concatenated {} datasets along '{dim}' ({joined_len} entries)",
        datasets.len()
    );
    Dataset::from_parts(dims, coords, data_vars, first.attrs.clone(), first.encoding)
}

struct Context<'a> {
    datasets: &'a [Dataset],
    dim: &'a str,
    new_dim: bool,
    compat: Compat,
}

impl<'a> Context<'a> {
    fn combine_all<F>(&self, table: F, selection: Selection) -> Result<Vec<(String, Variable)>>
    where
        F: Fn(&'a Dataset) -> &'a IndexMap<String, Variable>,
    {
        let names: IndexSet<&String> = self.datasets.iter().flat_map(|ds| table(ds).keys()).collect();
        names
            .into_iter()
            .map(|name| {
                let parts: Vec<Option<&Variable>> =
                    self.datasets.iter().map(|ds| table(ds).get(name)).collect();
                Ok((name.clone(), self.combine(name, &parts, selection)?))
            })
            .collect()
    }

    fn combine(&self, name: &str, parts: &[Option<&Variable>], selection: Selection) -> Result<Variable> {
        let present: Vec<&Variable> = parts.iter().flatten().copied().collect();
        let spans = present.iter().any(|v| v.dims().iter().any(|d| d == self.dim));
        let joined = spans
            || match selection {
                Selection::Minimal => false,
                Selection::All => true,
                Selection::Different => {
                    present.len() != parts.len()
                        || present.iter().any(|v| !v.same_values(present[0]))
                }
            };

        if joined {
            self.join(name, parts)
        } else {
            self.reconcile(name, &present)
        }
    }

    /// Concatenate one variable, giving it the dimension where it lacks it.
    fn join(&self, name: &str, parts: &[Option<&Variable>]) -> Result<Variable> {
        let mut layouts: Vec<Vec<String>> = Vec::with_capacity(parts.len());
        let mut values = Vec::with_capacity(parts.len());
        for (ds, part) in self.datasets.iter().zip(parts) {
            let var = part.ok_or_else(|| DatasetError::PartialVariable(name.to_string()))?;
            let (var_dims, array) = if var.dims().iter().any(|d| d == self.dim) {
                (var.dims().to_vec(), var.values().clone())
            } else {
                let mut expanded = vec![self.dim.to_string()];
                expanded.extend_from_slice(var.dims());
                let array = if self.new_dim {
                    var.values().clone().insert_axis(0)
                } else {
                    let len = ds
                        .dim_len(self.dim)
                        .ok_or_else(|| DatasetError::MissingDimension(self.dim.to_string()))?;
                    var.values().broadcast_leading(len)?
                };
                (expanded, array)
            };
            layouts.push(var_dims);
            values.push(array);
        }

        // Every part must lay its axes out the same way.
        let dims = layouts
            .first()
            .cloned()
            .ok_or_else(|| DatasetError::MissingVariable(name.to_string()))?;
        if layouts.iter().any(|l| *l != dims) {
            return Err(DatasetError::Conflict(name.to_string()));
        }
        let axis = dims
            .iter()
            .position(|d| d == self.dim)
            .ok_or_else(|| DatasetError::MissingDimension(self.dim.to_string()))?;
        let refs: Vec<_> = values.iter().collect();
        let joined = NdArray::concatenate(name, axis, &refs)?;

        let mut var = parts
            .iter()
            .flatten()
            .next()
            .map(|v| (*v).clone())
            .ok_or_else(|| DatasetError::MissingVariable(name.to_string()))?;
        var.replace_values(dims, joined);
        Ok(var)
    }

    fn reconcile(&self, name: &str, present: &[&Variable]) -> Result<Variable> {
        let first = *present
            .first()
            .ok_or_else(|| DatasetError::MissingVariable(name.to_string()))?;
        let agrees = |other: &Variable| match self.compat {
            Compat::Override => true,
            Compat::Equals => first.same_values(other),
            Compat::Identical => first.same_values(other) && first.attrs() == other.attrs(),
            Compat::NoConflicts => {
                first.dims() == other.dims() && first.values().equals_ignoring_nan(other.values())
            }
        };
        if present.iter().all(|v| agrees(*v)) {
            Ok(first.clone())
        } else {
            Err(DatasetError::Conflict(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::factory::{make_dataset, make_lc, make_wave_like, WAVELENGTH};
    use ndarray::Array2;

    fn visit(t0: f64, nt: usize, depth: f64) -> Dataset {
        let time: Vec<f64> = (0..nt).map(|i| t0 + i as f64).collect();
        let lc = make_lc(
            Array2::<f64>::ones((3, nt)),
            vec![1.0, 2.0, 3.0],
            time,
            "e-",
            "microns",
            "BJD_TDB",
            Some("data"),
        )
        .unwrap();
        let depth = make_wave_like(vec![depth; 3], vec![1.0, 2.0, 3.0], "%", "microns", None).unwrap();
        make_dataset([("data", lc), ("depth", depth)]).unwrap()
    }

    #[test]
    fn joins_along_time() {
        let ds = concat(&[visit(0.0, 4, 1.0), visit(10.0, 6, 1.0)], &ConcatOptions::default()).unwrap();

        assert_eq!(ds.dim_len(TIME), Some(10));
        assert_eq!(ds.data_var("data").unwrap().shape(), &[3, 10]);
        let time = ds.coord(TIME).unwrap().values().as_f64().unwrap();
        assert_eq!(time[[4]], 10.0);
        // Minimal: time-independent variables are kept once.
        assert_eq!(ds.data_var("depth").unwrap().dims(), [WAVELENGTH]);
        assert_eq!(ds.coord(WAVELENGTH).unwrap().shape(), &[3]);
    }

    #[test]
    fn override_takes_first_value() {
        let ds = concat(&[visit(0.0, 2, 1.0), visit(5.0, 2, 2.0)], &ConcatOptions::default()).unwrap();
        assert_eq!(ds.data_var("depth").unwrap().values(), &NdArray::from(vec![1.0; 3]));
    }

    #[test]
    fn equals_rejects_differences() {
        let options = ConcatOptions {
            compat: Compat::Equals,
            ..ConcatOptions::default()
        };
        let err = concat(&[visit(0.0, 2, 1.0), visit(5.0, 2, 2.0)], &options).unwrap_err();
        assert!(matches!(err, DatasetError::Conflict(name) if name == "depth"));
    }

    #[test]
    fn different_concatenates_changing_variables() {
        let options = ConcatOptions {
            data_vars: Selection::Different,
            ..ConcatOptions::default()
        };
        let ds = concat(&[visit(0.0, 2, 1.0), visit(5.0, 3, 2.0)], &options).unwrap();
        let depth = ds.data_var("depth").unwrap();
        assert_eq!(depth.dims(), [TIME, WAVELENGTH]);
        assert_eq!(depth.shape(), &[5, 3]);
    }

    #[test]
    fn all_broadcasts_every_variable() {
        let options = ConcatOptions {
            data_vars: Selection::All,
            ..ConcatOptions::default()
        };
        let ds = concat(&[visit(0.0, 2, 1.0), visit(5.0, 2, 1.0)], &options).unwrap();
        assert_eq!(ds.data_var("depth").unwrap().shape(), &[4, 3]);
        // Coordinates stay minimal.
        assert_eq!(ds.coord(WAVELENGTH).unwrap().shape(), &[3]);
    }

    #[test]
    fn new_dimension_is_created_when_absent() {
        let options = ConcatOptions {
            dim: "visit".into(),
            data_vars: Selection::All,
            ..ConcatOptions::default()
        };
        let ds = concat(&[visit(0.0, 2, 1.0), visit(0.0, 2, 2.0)], &options).unwrap();
        assert_eq!(ds.dims().keys().next().map(String::as_str), Some("visit"));
        assert_eq!(ds.data_var("data").unwrap().shape(), &[2, 3, 2]);
        assert_eq!(ds.data_var("depth").unwrap().shape(), &[2, 3]);
    }

    #[test]
    fn variable_missing_from_one_dataset_cannot_be_joined() {
        let mut partial = visit(5.0, 2, 1.0);
        partial.remove("data");
        let err = concat(&[visit(0.0, 2, 1.0), partial], &ConcatOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::PartialVariable(name) if name == "data"));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            concat(&[], &ConcatOptions::default()),
            Err(DatasetError::EmptyConcat)
        ));
    }
}
