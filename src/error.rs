use std::path::PathBuf;

use thiserror::Error;

/// A volume file could not be opened or parsed. Fatal to the open-file
/// operation; no state is mutated when this is returned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{path}: failed to read NIfTI file ({source})")]
    Nifti {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },
    #[error("{path}: expected a 4D [x, y, z, volume] dataset, got {dims} dimension(s)")]
    NotFourDimensional { path: PathBuf, dims: usize },
}

/// A ledger or export write failed. The triggering file switch or export is
/// blocked and in-memory state is preserved so the reviewer can retry.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{path}: failed to write side-car file ({source})")]
    SideCar {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path}: failed to write file ({source})")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: failed to write NIfTI file ({source})")]
    Nifti {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },
}

/// A single volume's prediction failed. Recovered locally: the volume gets
/// no verdict and the batch continues.
#[derive(Debug, Clone, Error)]
#[error("inference failed: {0}")]
pub struct InferenceError(pub String);

/// The classifier artifact could not be loaded. Fatal to the detection run;
/// no per-volume results are produced.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("{path}: failed to read model artifact ({source})")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: failed to parse model artifact ({source})")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: model artifact is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Index passed to the volume store exceeds the current array's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("index {index} out of range (extent {extent})")]
pub struct IndexOutOfRange {
    pub index: usize,
    pub extent: usize,
}
