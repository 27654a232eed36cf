pub mod exclusions;
pub mod gradients;
pub mod labels;
pub mod volume;

pub use exclusions::ExclusionLedger;
pub use gradients::GradientTables;
pub use labels::{LabelKind, LabelLedger, SliceKey, SliceLabels};
pub use volume::{Orientation, VolumeStore};

use std::path::{Path, PathBuf};

/// Side-car path for a volume file: same directory, same stem, fixed suffix.
/// `.nii.gz` is treated as a single extension.
pub(crate) fn side_car_path(volume_path: &Path, suffix: &str) -> PathBuf {
    let name = volume_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(name.as_str());
    volume_path.with_file_name(format!("{stem}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_car_path_replaces_known_extensions() {
        assert_eq!(
            side_car_path(Path::new("/data/scan.nii"), "_labels.csv"),
            PathBuf::from("/data/scan_labels.csv")
        );
        assert_eq!(
            side_car_path(Path::new("/data/scan.nii.gz"), ".bval"),
            PathBuf::from("/data/scan.bval")
        );
    }
}
