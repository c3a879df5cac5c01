use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffixes recognised for hierarchical (`h5`) files.
pub const H5_SUFFIXES: &[&str] = &[".h5", ".hdf5"];
/// Suffixes recognised for container (`xr`) files.
pub const XR_SUFFIXES: &[&str] = &[".h5", ".hdf5", ".nc"];

/// Append `.h5` unless the path already ends in `.h5` or `.hdf5`.
pub fn normalize_h5_path(path: impl AsRef<Path>) -> PathBuf {
    normalize(path.as_ref(), H5_SUFFIXES)
}

/// Append `.h5` unless the path already ends in `.h5`, `.hdf5` or `.nc`.
pub fn normalize_xr_path(path: impl AsRef<Path>) -> PathBuf {
    normalize(path.as_ref(), XR_SUFFIXES)
}

// The match is case-sensitive and works on the raw file name, so `foo.H5`
// becomes `foo.H5.h5`.
fn normalize(path: &Path, suffixes: &[&str]) -> PathBuf {
    let name = path.as_os_str().to_string_lossy();
    if suffixes.iter().any(|s| name.ends_with(s)) {
        return path.to_path_buf();
    }
    let mut raw = OsString::from(path.as_os_str());
    raw.push(".h5");
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h5_suffix_is_appended_once() {
        assert_eq!(normalize_h5_path("foo"), PathBuf::from("foo.h5"));
        assert_eq!(normalize_h5_path("foo.h5"), PathBuf::from("foo.h5"));
        assert_eq!(normalize_h5_path("dir/foo.hdf5"), PathBuf::from("dir/foo.hdf5"));
        assert_eq!(normalize_h5_path("foo.txt"), PathBuf::from("foo.txt.h5"));
    }

    #[test]
    fn netcdf_is_only_accepted_for_containers() {
        assert_eq!(normalize_xr_path("foo.nc"), PathBuf::from("foo.nc"));
        assert_eq!(normalize_h5_path("foo.nc"), PathBuf::from("foo.nc.h5"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(normalize_xr_path("foo.NC"), PathBuf::from("foo.NC.h5"));
    }
}
