/// Data layer: labeled arrays, datasets and the helpers that build them.
///
/// Architecture:
/// ```text
///   ndarray / Vec / scalar
///        │
///        ▼
///   ┌──────────┐
///   │  array    │  NdArray: one owned array per storable dtype
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  factory  │  flux cube / time series / spectrum / light curve
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  dataset  │  Variable, DataArray, Dataset (+ set_attr, merge)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  concat   │  join datasets along a dimension
///   └──────────┘
/// ```

pub mod array;
pub mod concat;
pub mod dataset;
pub mod error;
pub mod factory;
pub mod model;

pub use array::{DType, NdArray};
pub use concat::{concat, Compat, ConcatOptions, Selection};
pub use dataset::{Conflict, DataArray, Dataset, Encoding, FieldValue, Variable};
pub use error::DatasetError;
pub use factory::{make_dataset, make_flux_like, make_lc, make_time_like, make_wave_like};
pub use model::{Attrs, MetadataValue};
