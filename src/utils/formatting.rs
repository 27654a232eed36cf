use std::collections::BTreeSet;
use std::path::Path;

use crate::detect::VolumeVerdict;

/// File-list entry label: the path relative to the discovery root when
/// possible, the bare file name otherwise.
pub fn file_label(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|root| path.strip_prefix(root).ok())
        .map(|relative| relative.display().to_string())
        .unwrap_or_else(|| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
}

/// One-line status for the volume slider: current position plus the marker
/// set of the displayed volume.
pub fn volume_status(
    volume: usize,
    volume_count: usize,
    labeled: &BTreeSet<usize>,
    excluded: bool,
    verdict: Option<&VolumeVerdict>,
) -> String {
    if volume_count == 0 {
        return String::from("No volumes");
    }
    let mut status = format!("Volume {} / {}", volume + 1, volume_count);
    if labeled.contains(&volume) {
        status.push_str("  [labeled]");
    }
    if excluded {
        status.push_str("  [excluded]");
    }
    if let Some(text) = verdict.and_then(verdict_marker) {
        status.push_str("  ");
        status.push_str(&text);
    }
    status
}

/// Marker text for a flagged volume; clean and unavailable verdicts show
/// nothing.
pub fn verdict_marker(verdict: &VolumeVerdict) -> Option<String> {
    match verdict {
        VolumeVerdict::LikelyBad { score } => Some(format!("[motion {score}%]")),
        VolumeVerdict::Clean | VolumeVerdict::Unavailable => None,
    }
}

/// Summary line under the volume slider: how many volumes carry labels, are
/// excluded, or were flagged by detection.
pub fn tick_summary(
    labeled: &BTreeSet<usize>,
    excluded: &BTreeSet<usize>,
    verdicts: &[VolumeVerdict],
) -> String {
    let flagged = verdicts
        .iter()
        .filter(|v| matches!(v, VolumeVerdict::LikelyBad { .. }))
        .count();
    format!(
        "{} labeled, {} excluded, {} flagged",
        labeled.len(),
        excluded.len(),
        flagged
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn file_label_prefers_relative_path() {
        let root = PathBuf::from("/data/study");
        let path = root.join("subject01").join("dwi.nii.gz");
        assert_eq!(file_label(&path, Some(&root)), "subject01/dwi.nii.gz");
        assert_eq!(file_label(&path, None), "dwi.nii.gz");
    }

    #[test]
    fn volume_status_carries_all_markers() {
        let labeled: BTreeSet<usize> = [2].into_iter().collect();
        let status = volume_status(
            2,
            10,
            &labeled,
            true,
            Some(&VolumeVerdict::LikelyBad { score: 87 }),
        );
        assert_eq!(status, "Volume 3 / 10  [labeled]  [excluded]  [motion 87%]");
    }

    #[test]
    fn empty_store_shows_no_volume_position() {
        let status = volume_status(0, 0, &BTreeSet::new(), false, None);
        assert_eq!(status, "No volumes");
    }

    #[test]
    fn clean_and_unavailable_verdicts_have_no_marker() {
        assert_eq!(verdict_marker(&VolumeVerdict::Clean), None);
        assert_eq!(verdict_marker(&VolumeVerdict::Unavailable), None);
        let summary = tick_summary(
            &BTreeSet::new(),
            &BTreeSet::new(),
            &[VolumeVerdict::Clean, VolumeVerdict::LikelyBad { score: 55 }],
        );
        assert_eq!(summary, "0 labeled, 0 excluded, 1 flagged");
    }
}
