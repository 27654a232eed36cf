use std::fs;
use std::io;
use std::path::Path;

use crate::error::PersistenceError;
use crate::model::side_car_path;

const BVAL_SUFFIX: &str = ".bval";
const BVEC_SUFFIX: &str = ".bvec";
const BMATRIX_SUFFIX: &str = ".bmatrix";

/// Paired per-volume gradient tables for diffusion-weighted scans: one
/// b-value and one `x y z` direction row per volume. Present only for some
/// datasets; export row-filters both by the kept-volume set and recomputes
/// the derived b-matrix so all paired artifacts stay consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTables {
    bvals: Vec<f64>,
    bvecs: Vec<[f64; 3]>,
}

impl GradientTables {
    /// Reads the gradient side-cars next to `volume_path`, if both exist.
    /// Returns `Ok(None)` when the scan simply has no gradient data.
    pub fn locate(volume_path: &Path) -> Result<Option<Self>, PersistenceError> {
        let bval_path = side_car_path(volume_path, BVAL_SUFFIX);
        let bvec_path = side_car_path(volume_path, BVEC_SUFFIX);
        if !bval_path.is_file() || !bvec_path.is_file() {
            return Ok(None);
        }

        let bvals = parse_bvals(&bval_path)?;
        let bvecs = parse_bvecs(&bvec_path)?;
        if bvals.len() != bvecs.len() {
            return Err(malformed(
                &bvec_path,
                format!(
                    "{} b-values but {} direction rows",
                    bvals.len(),
                    bvecs.len()
                ),
            ));
        }
        Ok(Some(Self { bvals, bvecs }))
    }

    pub fn volume_count(&self) -> usize {
        self.bvals.len()
    }

    /// New tables containing only the rows for `good_volumes`, in order.
    /// Pure; panics if an index is out of range (callers derive the index
    /// set from the same volume count).
    pub fn filter(&self, good_volumes: &[usize]) -> Self {
        Self {
            bvals: good_volumes.iter().map(|&v| self.bvals[v]).collect(),
            bvecs: good_volumes.iter().map(|&v| self.bvecs[v]).collect(),
        }
    }

    /// Derived N×6 b-matrix: `b * [vx², 2·vx·vy, 2·vx·vz, vy², 2·vy·vz, vz²]`
    /// per row.
    pub fn b_matrix(&self) -> Vec<[f64; 6]> {
        self.bvals
            .iter()
            .zip(&self.bvecs)
            .map(|(&b, &[x, y, z])| {
                [
                    b * x * x,
                    b * 2.0 * x * y,
                    b * 2.0 * x * z,
                    b * y * y,
                    b * 2.0 * y * z,
                    b * z * z,
                ]
            })
            .collect()
    }

    /// Writes the filtered bval/bvec side-cars and the recomputed b-matrix
    /// next to the exported volume at `export_path`.
    pub fn write_beside(&self, export_path: &Path) -> Result<(), PersistenceError> {
        let bval_path = side_car_path(export_path, BVAL_SUFFIX);
        let bvec_path = side_car_path(export_path, BVEC_SUFFIX);
        let bmatrix_path = side_car_path(export_path, BMATRIX_SUFFIX);

        let bvals = self
            .bvals
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        write_text(&bval_path, &(bvals + "\n"))?;

        let bvecs = self
            .bvecs
            .iter()
            .map(|[x, y, z]| format!("{x} {y} {z}"))
            .collect::<Vec<_>>()
            .join("\n");
        write_text(&bvec_path, &(bvecs + "\n"))?;

        let bmatrix = self
            .b_matrix()
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect::<Vec<_>>()
            .join("\n");
        write_text(&bmatrix_path, &(bmatrix + "\n"))
    }

    #[cfg(test)]
    pub fn from_parts(bvals: Vec<f64>, bvecs: Vec<[f64; 3]>) -> Self {
        Self { bvals, bvecs }
    }
}

fn parse_bvals(path: &Path) -> Result<Vec<f64>, PersistenceError> {
    // np.loadtxt layout: any whitespace arrangement, one value per volume.
    read_text(path)?
        .split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| malformed(path, format!("bad b-value {token:?}")))
        })
        .collect()
}

fn parse_bvecs(path: &Path) -> Result<Vec<[f64; 3]>, PersistenceError> {
    let text = read_text(path)?;
    let mut rows = Vec::new();
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(|token| {
                token
                    .parse()
                    .map_err(|_| malformed(path, format!("bad direction component {token:?}")))
            })
            .collect::<Result<_, _>>()?;
        match fields.as_slice() {
            [x, y, z] => rows.push([*x, *y, *z]),
            other => {
                return Err(malformed(
                    path,
                    format!("expected 3 direction components per row, got {}", other.len()),
                ))
            }
        }
    }
    Ok(rows)
}

fn read_text(path: &Path) -> Result<String, PersistenceError> {
    fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_text(path: &Path, text: &str) -> Result<(), PersistenceError> {
    fs::write(path, text).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn malformed(path: &Path, reason: String) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("niftiscope-gradients-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn filter_keeps_rows_in_order() {
        let tables = GradientTables::from_parts(
            vec![0.0, 750.0, 750.0, 750.0],
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
        );
        let filtered = tables.filter(&[0, 2, 3]);
        assert_eq!(filtered.volume_count(), 3);
        assert_eq!(filtered.bvals, vec![0.0, 750.0, 750.0]);
        assert_eq!(filtered.bvecs[1], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn b_matrix_matches_hand_computation() {
        let tables =
            GradientTables::from_parts(vec![750.0], vec![[0.5, -0.5, 0.70710678]]);
        let row = tables.b_matrix()[0];
        assert!((row[0] - 750.0 * 0.25).abs() < 1e-9);
        assert!((row[1] - 750.0 * 2.0 * 0.5 * -0.5).abs() < 1e-9);
        assert!((row[2] - 750.0 * 2.0 * 0.5 * 0.70710678).abs() < 1e-9);
        assert!((row[3] - 750.0 * 0.25).abs() < 1e-9);
        assert!((row[4] - 750.0 * 2.0 * -0.5 * 0.70710678).abs() < 1e-9);
        assert!((row[5] - 750.0 * 0.70710678 * 0.70710678).abs() < 1e-6);
    }

    #[test]
    fn locate_round_trips_written_tables() {
        let dir = temp_dir();
        let volume_path = dir.join("dwi.nii");
        let tables = GradientTables::from_parts(
            vec![0.0, 750.0],
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        );
        tables.write_beside(&volume_path).unwrap();

        let reread = GradientTables::locate(&volume_path).unwrap().unwrap();
        assert_eq!(reread, tables);
    }

    #[test]
    fn locate_is_none_without_side_cars() {
        let volume_path = temp_dir().join("plain.nii");
        assert!(GradientTables::locate(&volume_path).unwrap().is_none());
    }
}
