use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, Array4, ArrayView3, Axis, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::{IndexOutOfRange, LoadError, PersistenceError};

/// One of the three fixed viewing planes. Fixes which two spatial axes are
/// displayed and which one is scanned by the slice index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Orientation {
    Axial,
    Sagittal,
    Coronal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Sagittal,
        Orientation::Coronal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Axial => "Axial",
            Orientation::Sagittal => "Sagittal",
            Orientation::Coronal => "Coronal",
        }
    }
}

/// `NiftiHeader` is a large stack object; keep it boxed.
type BoxedHeader = Box<NiftiHeader>;

/// Owns the currently loaded 4D scan (`[x, y, z, volume]`, voxel intensities
/// as `f32`) and its header metadata. The voxel array sits behind an `Arc` so
/// the detection worker can read it without copying; it is never mutated in
/// place; switching files replaces the whole store.
#[derive(Debug, Clone)]
pub struct VolumeStore {
    path: PathBuf,
    header: BoxedHeader,
    data: Arc<Array4<f32>>,
}

impl VolumeStore {
    /// Opens a `.nii` / `.nii.gz` dataset. Fails with `LoadError` if the file
    /// cannot be parsed or is not a 4D scan.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        log::info!("Loading NIfTI file: {}", path.display());

        let wrap = |source| LoadError::Nifti {
            path: path.to_path_buf(),
            source,
        };
        let obj = ReaderOptions::new().read_file(path).map_err(wrap)?;
        let header = Box::new(obj.header().clone());

        let data = obj.into_volume().into_ndarray::<f32>().map_err(wrap)?;
        let dims = data.ndim();
        let data = data
            .into_dimensionality::<Ix4>()
            .map_err(|_| LoadError::NotFourDimensional {
                path: path.to_path_buf(),
                dims,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            data: Arc::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// Shared handle to the voxel array, read-only by convention.
    pub fn data(&self) -> Arc<Array4<f32>> {
        Arc::clone(&self.data)
    }

    /// `(x, y, z, volumes)` extents.
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        let s = self.data.shape();
        (s[0], s[1], s[2], s[3])
    }

    pub fn volume_count(&self) -> usize {
        self.data.shape()[3]
    }

    /// Number of slices scanned by the given orientation's slice index.
    pub fn slice_extent(&self, orientation: Orientation) -> usize {
        let (x, y, z, _) = self.shape();
        match orientation {
            Orientation::Axial => z,
            Orientation::Sagittal => x,
            Orientation::Coronal => y,
        }
    }

    /// View of one 3D volume.
    ///
    /// Panics if `volume` is out of range; callers go through the clamped
    /// navigation state.
    pub fn volume_view(&self, volume: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(3), volume)
    }

    /// Extracts the 2D plane at `slice` for the given orientation and volume.
    /// No side effects; fails with `IndexOutOfRange` on either index.
    pub fn extract_slice(
        &self,
        orientation: Orientation,
        slice: usize,
        volume: usize,
    ) -> Result<Array2<f32>, IndexOutOfRange> {
        if volume >= self.volume_count() {
            return Err(IndexOutOfRange {
                index: volume,
                extent: self.volume_count(),
            });
        }
        let extent = self.slice_extent(orientation);
        if slice >= extent {
            return Err(IndexOutOfRange {
                index: slice,
                extent,
            });
        }

        let vol = self.data.index_axis(Axis(3), volume);
        let plane = match orientation {
            Orientation::Axial => vol.index_axis_move(Axis(2), slice),
            Orientation::Sagittal => vol.index_axis_move(Axis(0), slice),
            Orientation::Coronal => vol.index_axis_move(Axis(1), slice),
        };
        Ok(plane.to_owned())
    }

    /// Ratio of the two in-plane axis extents, for display scaling only.
    pub fn aspect_ratio(&self, orientation: Orientation) -> f32 {
        let (x, y, z, _) = self.shape();
        match orientation {
            Orientation::Axial => x as f32 / y as f32,
            Orientation::Sagittal => y as f32 / z as f32,
            Orientation::Coronal => x as f32 / z as f32,
        }
    }

    /// Volume indices kept after removing `excluded`, in ascending order.
    pub fn good_volumes(&self, excluded: &BTreeSet<usize>) -> Vec<usize> {
        (0..self.volume_count())
            .filter(|v| !excluded.contains(v))
            .collect()
    }

    /// New 4D array containing only the volumes not in `excluded`, order
    /// preserved among the kept indices. Pure; does not mutate the store.
    pub fn filter_volumes(&self, excluded: &BTreeSet<usize>) -> Array4<f32> {
        self.data.select(Axis(3), &self.good_volumes(excluded))
    }

    /// Writes `data` to `path` with this store's header metadata, creating
    /// intermediate directories as needed.
    pub fn write_with_header(
        &self,
        data: &Array4<f32>,
        path: &Path,
    ) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        WriterOptions::new(path)
            .reference_header(&self.header)
            .write_nifti(data)
            .map_err(|source| PersistenceError::Nifti {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Intensity at the given percentile of one volume, nearest-rank. Used
    /// for the automatic display brightness window.
    pub fn volume_percentile(&self, volume: usize, percentile: f32) -> f32 {
        let view = self.volume_view(volume);
        let mut values: Vec<f32> = view.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return 0.0;
        }
        let rank = ((values.len() - 1) as f32 * percentile / 100.0).round() as usize;
        let (_, nth, _) =
            values.select_nth_unstable_by(rank, |a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        *nth
    }

    /// Builds a store around an in-memory array. Test seam; the header is a
    /// default NIfTI-1 header.
    #[cfg(test)]
    pub fn from_parts<P: AsRef<Path>>(path: P, data: Array4<f32>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            header: Box::default(),
            data: Arc::new(data),
        }
    }
}
