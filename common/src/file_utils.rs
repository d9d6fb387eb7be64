//! File utility functions for listing and filtering files.

use std::fs;
use std::path::{Path, PathBuf};

/// Supported FITS file extensions.
pub const FITS_EXTENSIONS: &[&str] = &["fit", "fits", "fts"];

/// Returns true when the path carries one of the FITS extensions.
/// Extensions are matched case-insensitively.
pub fn is_fits_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    FITS_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Returns paths to all files in a directory matching the given extensions.
/// Extensions are matched case-insensitively.
pub fn files_with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }

    fs::read_dir(dir)
        .expect("Failed to read directory")
        .filter_map(|e| e.ok())
        .filter(|e| {
            let path = e.path();
            if !path.is_file() {
                return false;
            }
            let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
            extensions.contains(&ext.to_lowercase().as_str())
        })
        .map(|e| e.path())
        .collect()
}

/// Returns paths to all FITS image files in the given directory.
pub fn fits_files(dir: &Path) -> Vec<PathBuf> {
    files_with_extensions(dir, FITS_EXTENSIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_fits_extensions_case_insensitively() {
        assert!(is_fits_file(Path::new("night1/image042.fits")));
        assert!(is_fits_file(Path::new("image042.FIT")));
        assert!(is_fits_file(Path::new("image042.Fts")));
        assert!(!is_fits_file(Path::new("image042.jpg")));
        assert!(!is_fits_file(Path::new("image042")));
    }

    #[test]
    fn lists_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.fits", "b.FIT", "c.txt", "d.fts"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub.fits")).unwrap();

        let mut found: Vec<String> = fits_files(dir.path())
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        found.sort();

        assert_eq!(found, ["a.fits", "b.FIT", "d.fts"]);
    }

    #[test]
    fn missing_directory_yields_empty_list() {
        assert!(fits_files(Path::new("/nonexistent/path/hopefully")).is_empty());
    }
}
