//! Helpers for labeled scientific arrays: building flux cubes, spectra and
//! light curves, and moving them to and from compressed files.

pub mod data;
pub mod io;

pub use data::{
    concat, make_dataset, make_flux_like, make_lc, make_time_like, make_wave_like, ConcatOptions,
    Conflict, DataArray, Dataset, DatasetError, NdArray, Variable,
};
pub use io::{read_h5, read_xr, write_h5, write_xr, Data};
