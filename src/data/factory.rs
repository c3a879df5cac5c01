//! Constructors for the labeled arrays used throughout the reduction
//! pipeline: flux cubes, time series, spectra and spectroscopic light curves.

use super::array::NdArray;
use super::dataset::{DataArray, Dataset, Variable};
use super::error::Result;

pub const TIME: &str = "time";
pub const WAVELENGTH: &str = "wavelength";
/// Detector row.
pub const Y: &str = "y";
/// Detector column.
pub const X: &str = "x";

/// Flux-like cube with dimensions `(time, y, x)`.
///
/// `y` and `x` default to pixel indices `0..shape[1]` and `0..shape[2]`.
/// The array records `flux_units` and `time_units`; the `time` coordinate
/// records `time_units` as well.
pub fn make_flux_like(
    flux: impl Into<NdArray>,
    time: impl Into<NdArray>,
    flux_units: &str,
    time_units: &str,
    name: Option<&str>,
    y: Option<NdArray>,
    x: Option<NdArray>,
) -> Result<DataArray> {
    let variable = Variable::new([TIME, Y, X], flux)?
        .with_attr("flux_units", flux_units)
        .with_attr("time_units", time_units);
    let (ny, nx) = (variable.shape()[1], variable.shape()[2]);
    let y = y.unwrap_or_else(|| NdArray::arange(ny));
    let x = x.unwrap_or_else(|| NdArray::arange(nx));

    DataArray::new(variable)
        .with_name(name)
        .with_coord(TIME, Variable::new([TIME], time)?.with_attr("time_units", time_units))?
        .with_coord(Y, Variable::new([Y], y)?)?
        .with_coord(X, Variable::new([X], x)?)
}

/// Time series with the single dimension `time`.
pub fn make_time_like(
    t: impl Into<NdArray>,
    time: impl Into<NdArray>,
    units: &str,
    time_units: &str,
    name: Option<&str>,
) -> Result<DataArray> {
    let variable = Variable::new([TIME], t)?
        .with_attr("units", units)
        .with_attr("time_units", time_units);
    DataArray::new(variable)
        .with_name(name)
        .with_coord(TIME, Variable::new([TIME], time)?.with_attr("time_units", time_units))
}

/// Spectrum-like array with the single dimension `wavelength`.
pub fn make_wave_like(
    w: impl Into<NdArray>,
    wavelength: impl Into<NdArray>,
    units: &str,
    wave_units: &str,
    name: Option<&str>,
) -> Result<DataArray> {
    let variable = Variable::new([WAVELENGTH], w)?
        .with_attr("units", units)
        .with_attr("wave_units", wave_units);
    DataArray::new(variable).with_name(name).with_coord(
        WAVELENGTH,
        Variable::new([WAVELENGTH], wavelength)?.with_attr("wave_units", wave_units),
    )
}

/// Light curves with dimensions `(wavelength, time)`.
pub fn make_lc(
    spec: impl Into<NdArray>,
    wave: impl Into<NdArray>,
    time: impl Into<NdArray>,
    flux_units: &str,
    wave_units: &str,
    time_units: &str,
    name: Option<&str>,
) -> Result<DataArray> {
    let variable = Variable::new([WAVELENGTH, TIME], spec)?
        .with_attr("flux_units", flux_units)
        .with_attr("wave_units", wave_units)
        .with_attr("time_units", time_units);
    DataArray::new(variable)
        .with_name(name)
        .with_coord(
            WAVELENGTH,
            Variable::new([WAVELENGTH], wave)?.with_attr("wave_units", wave_units),
        )?
        .with_coord(TIME, Variable::new([TIME], time)?.with_attr("time_units", time_units))
}

/// Assemble a dataset from named labeled arrays. Coordinates shared by
/// several arrays must agree.
pub fn make_dataset<I, S>(arrays: I) -> Result<Dataset>
where
    I: IntoIterator<Item = (S, DataArray)>,
    S: AsRef<str>,
{
    let mut ds = Dataset::new();
    for (name, array) in arrays {
        ds.insert_array(name.as_ref(), array)?;
    }
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::error::DatasetError;
    use crate::data::model::MetadataValue;
    use ndarray::{Array, Array1, Array2, Array3};

    fn time_axis(n: usize) -> Array1<f64> {
        Array::linspace(0.0, 1.0, n)
    }

    #[test]
    fn flux_cube_defaults_pixel_ticks() {
        let flux = Array3::<f64>::ones((10, 5, 20));
        let da = make_flux_like(flux.clone(), time_axis(10), "e-", "MJD", Some("flux"), None, None)
            .unwrap();

        assert_eq!(da.dims(), [TIME, Y, X]);
        assert_eq!(da.values(), &NdArray::from(flux));
        assert_eq!(da.name(), Some("flux"));
        assert_eq!(da.attrs()["flux_units"], MetadataValue::from("e-"));
        assert_eq!(da.attrs()["time_units"], MetadataValue::from("MJD"));
        assert_eq!(da.coord(Y).unwrap().values(), &NdArray::arange(5));
        assert_eq!(da.coord(X).unwrap().values(), &NdArray::arange(20));
        assert_eq!(
            da.coord(TIME).unwrap().attrs()["time_units"],
            MetadataValue::from("MJD")
        );
    }

    #[test]
    fn flux_cube_keeps_explicit_pixel_ticks() {
        let flux = Array3::<f32>::zeros((2, 3, 2));
        let y = NdArray::from(vec![10i64, 11, 12]);
        let da = make_flux_like(flux, vec![0.0, 1.0], "e-", "BJD_TDB", None, Some(y.clone()), None)
            .unwrap();
        assert_eq!(da.coord(Y).unwrap().values(), &y);
        assert_eq!(da.name(), None);
    }

    #[test]
    fn flux_cube_requires_three_dimensions() {
        let flux = Array2::<f64>::zeros((2, 3));
        let err = make_flux_like(flux, vec![0.0, 1.0], "e-", "MJD", None, None, None).unwrap_err();
        assert!(matches!(err, DatasetError::RankMismatch { ndim: 2, .. }));
    }

    #[test]
    fn time_series_records_units() {
        let da = make_time_like(
            vec![40.1, 40.2, 40.0],
            time_axis(3),
            "K",
            "MJD",
            Some("Detector_Temperature"),
        )
        .unwrap();
        assert_eq!(da.dims(), [TIME]);
        assert_eq!(da.attrs()["units"], MetadataValue::from("K"));
        assert_eq!(da.attrs()["time_units"], MetadataValue::from("MJD"));
        assert_eq!(da.name(), Some("Detector_Temperature"));
    }

    #[test]
    fn mismatched_time_axis_is_rejected() {
        let err = make_time_like(vec![1.0, 2.0], time_axis(3), "K", "MJD", None).unwrap_err();
        assert!(matches!(err, DatasetError::LengthMismatch { .. }));
    }

    #[test]
    fn spectrum_annotates_wavelength_axis() {
        let wavelength = Array::linspace(1.0, 5.0, 20);
        let da = make_wave_like(Array1::<f64>::ones(20), wavelength, "%", "microns", Some("Transit Depth"))
            .unwrap();
        assert_eq!(da.dims(), [WAVELENGTH]);
        assert_eq!(da.attrs()["units"], MetadataValue::from("%"));
        assert_eq!(
            da.coord(WAVELENGTH).unwrap().attrs()["wave_units"],
            MetadataValue::from("microns")
        );
    }

    #[test]
    fn light_curve_annotates_both_axes() {
        let spec = Array2::<f64>::zeros((4, 6));
        let da = make_lc(
            spec,
            Array::linspace(1.0, 2.0, 4),
            time_axis(6),
            "e-",
            "microns",
            "BJD_TDB",
            Some("spec_unc"),
        )
        .unwrap();
        assert_eq!(da.dims(), [WAVELENGTH, TIME]);
        assert_eq!(da.attrs().len(), 3);
        assert!(da.coord(WAVELENGTH).unwrap().attrs().contains_key("wave_units"));
        assert!(da.coord(TIME).unwrap().attrs().contains_key("time_units"));
    }

    #[test]
    fn dataset_from_arrays_shares_coordinates() {
        let time = time_axis(10);
        let flux = make_flux_like(Array3::<f64>::ones((10, 5, 20)), time.clone(), "e-", "MJD", None, None, None)
            .unwrap();
        let temp = make_time_like(Array1::<f64>::zeros(10), time, "K", "MJD", None).unwrap();
        let wave = make_wave_like(
            Array1::<f64>::ones(20),
            Array::linspace(1.0, 5.0, 20),
            "%",
            "microns",
            None,
        )
        .unwrap();

        let ds = make_dataset([("flux", flux.clone()), ("t", temp.clone()), ("w", wave.clone())]).unwrap();
        assert_eq!(ds.data_var("flux").unwrap().values(), flux.values());
        assert_eq!(ds.data_var("t").unwrap().values(), temp.values());
        assert_eq!(ds.data_var("w").unwrap().values(), wave.values());
        assert_eq!(
            ds.dims().keys().collect::<Vec<_>>(),
            [TIME, Y, X, WAVELENGTH]
        );
    }

    #[test]
    fn dataset_rejects_disagreeing_coordinates() {
        let a = make_time_like(vec![1.0, 2.0], vec![0.0, 1.0], "K", "MJD", None).unwrap();
        let b = make_time_like(vec![1.0, 2.0], vec![5.0, 6.0], "K", "MJD", None).unwrap();
        let err = make_dataset([("a", a), ("b", b)]).unwrap_err();
        assert!(matches!(err, DatasetError::CoordinateConflict(_)));
    }
}
