use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::{LoadError, PersistenceError};
use crate::model::{
    ExclusionLedger, GradientTables, LabelKind, LabelLedger, Orientation, SliceKey, SliceLabels,
    VolumeStore,
};

/// How detection runs drive the session: one file on demand, or every file
/// in the list with auto-exclusion and export between files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewMode {
    #[default]
    Interactive,
    Batch,
}

/// Why a file switch was refused. Either way the previously open file stays
/// fully reviewable.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("could not save annotations for the open file: {0}")]
    Save(#[from] PersistenceError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

pub const BRIGHTNESS_OFFSET: f32 = 20.0;

/// Display brightness window. The slider position plus a fixed offset is the
/// display white point; `p90` is the displayed volume's 90th-percentile
/// intensity and anchors the reviewer's relative preference when volumes of
/// different intensity scale are shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brightness {
    pub p90: f32,
    pub slider: f32,
    /// Upper slider bound, twice the volume's p90.
    pub max: f32,
}

impl Brightness {
    /// Auto window for a freshly shown volume: white point at the volume's
    /// 90th percentile.
    pub fn auto(p90: f32) -> Self {
        let max = (2.0 * p90).max(1.0);
        Self {
            p90,
            slider: (p90 - BRIGHTNESS_OFFSET).clamp(0.0, max),
            max,
        }
    }

    /// Carries the relative slider position over to a volume with percentile
    /// `new_p90`: `new = clamp(new_p90 / old_p90 * (old + offset) - offset)`.
    pub fn rescale_to(&self, new_p90: f32) -> Self {
        if self.p90 <= 0.0 {
            return Self::auto(new_p90);
        }
        let max = (2.0 * new_p90).max(1.0);
        let raw = self.slider + BRIGHTNESS_OFFSET;
        let slider = (new_p90 / self.p90 * raw - BRIGHTNESS_OFFSET).clamp(0.0, max);
        Self {
            p90: new_p90,
            slider,
            max,
        }
    }

    /// Intensity mapped to full display brightness.
    pub fn white_point(&self) -> f32 {
        (self.slider + BRIGHTNESS_OFFSET).max(1.0)
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::auto(1.0)
    }
}

/// The reviewing session: the discovered file list, the open `VolumeStore`,
/// both annotation ledgers, optional gradient tables and the tri-plane
/// navigation state. All mutation from the interactive thread goes through
/// here; the detection worker only ever reads the shared voxel array.
#[derive(Debug, Default)]
pub struct ReviewController {
    root: Option<PathBuf>,
    files: Vec<PathBuf>,
    selected: Option<usize>,
    store: Option<VolumeStore>,
    labels: LabelLedger,
    exclusions: ExclusionLedger,
    gradients: Option<GradientTables>,
    volume: usize,
    slices: [usize; 3],
    brightness: Brightness,
}

impl ReviewController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the file list with every `.nii`/`.nii.gz` under `root`,
    /// recursively, sorted by path. Does not open anything.
    pub fn set_root(&mut self, root: PathBuf) {
        self.files = discover_nii_files(&root);
        log::info!(
            "Discovered {} volume file(s) under {}",
            self.files.len(),
            root.display()
        );
        self.root = Some(root);
        self.selected = None;
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn store(&self) -> Option<&VolumeStore> {
        self.store.as_ref()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.labels.is_dirty() || self.exclusions.is_dirty()
    }

    /// Switches to `files[index]`. Save-gated: the open file's annotations
    /// are persisted first, and a save failure aborts the switch with all
    /// in-memory state intact. If the new file then fails to load, the
    /// ledgers are re-hydrated from the old file's side-cars so the old file
    /// stays reviewable.
    pub fn open_file(&mut self, index: usize) -> Result<(), SwitchError> {
        let Some(path) = self.files.get(index).cloned() else {
            return Ok(());
        };
        self.save_annotations()?;

        let store = match VolumeStore::load(&path) {
            Ok(store) => store,
            Err(err) => {
                if let Some(old) = &self.store {
                    let old_path = old.path().to_path_buf();
                    self.labels.set_file_path(&old_path);
                    self.exclusions.set_file_path(&old_path);
                }
                return Err(err.into());
            }
        };

        self.labels.set_file_path(&path);
        self.exclusions.set_file_path(&path);
        self.gradients = match GradientTables::locate(&path) {
            Ok(tables) => tables,
            Err(err) => {
                log::warn!("ignoring unreadable gradient tables: {err}");
                None
            }
        };

        // First open lands on the middle slice of every plane; later switches
        // clamp the held position so the reviewer's viewpoint carries over.
        if self.store.is_none() {
            self.volume = 0;
            for orientation in Orientation::ALL {
                self.slices[plane_index(orientation)] = store.slice_extent(orientation) / 2;
            }
        } else {
            self.volume = self.volume.min(store.volume_count().saturating_sub(1));
            for orientation in Orientation::ALL {
                let extent = store.slice_extent(orientation).saturating_sub(1);
                let slice = &mut self.slices[plane_index(orientation)];
                *slice = (*slice).min(extent);
            }
        }
        self.brightness = Brightness::auto(store.volume_percentile(self.volume, 90.0));
        self.store = Some(store);
        self.selected = Some(index);
        Ok(())
    }

    /// Persists both ledgers and re-hydrates them so reviewing can continue.
    /// If the exclusion save fails after the label save succeeded, only the
    /// label ledger is re-hydrated; the unsaved exclusions stay in memory for
    /// a retry.
    pub fn save_annotations(&mut self) -> Result<(), PersistenceError> {
        let Some(path) = self.store.as_ref().map(|s| s.path().to_path_buf()) else {
            return Ok(());
        };
        self.labels.save()?;
        match self.exclusions.save() {
            Ok(()) => {
                self.labels.set_file_path(&path);
                self.exclusions.set_file_path(&path);
                Ok(())
            }
            Err(err) => {
                self.labels.set_file_path(&path);
                Err(err)
            }
        }
    }

    // Navigation. All setters clamp so the held indices are always valid for
    // the open store.

    pub fn volume(&self) -> usize {
        self.volume
    }

    /// Changes the displayed volume and re-derives the brightness window so
    /// the reviewer's relative preference survives intensity-scale jumps.
    pub fn set_volume(&mut self, volume: usize) {
        let Some(store) = &self.store else { return };
        let volume = volume.min(store.volume_count().saturating_sub(1));
        if volume != self.volume {
            self.volume = volume;
            self.brightness = self
                .brightness
                .rescale_to(store.volume_percentile(volume, 90.0));
        }
    }

    pub fn slice(&self, orientation: Orientation) -> usize {
        self.slices[plane_index(orientation)]
    }

    pub fn set_slice(&mut self, orientation: Orientation, slice: usize) {
        let Some(store) = &self.store else { return };
        let extent = store.slice_extent(orientation).saturating_sub(1);
        self.slices[plane_index(orientation)] = slice.min(extent);
    }

    pub fn brightness(&self) -> Brightness {
        self.brightness
    }

    pub fn set_brightness_slider(&mut self, value: f32) {
        self.brightness.slider = value.clamp(0.0, self.brightness.max);
    }

    // Annotation entry points, all addressing the currently displayed slice
    // of the given plane.

    pub fn current_key(&self, orientation: Orientation) -> SliceKey {
        SliceKey {
            volume: self.volume,
            orientation,
            slice: self.slice(orientation),
        }
    }

    pub fn current_labels(&self, orientation: Orientation) -> SliceLabels {
        self.labels.labels_for(self.current_key(orientation))
    }

    pub fn set_label(&mut self, orientation: Orientation, kind: LabelKind, present: bool) {
        if self.store.is_some() {
            self.labels.set_label(self.current_key(orientation), kind, present);
        }
    }

    pub fn set_comment(&mut self, orientation: Orientation, comment: String) {
        if self.store.is_some() {
            self.labels.set_comment(self.current_key(orientation), comment);
        }
    }

    /// Flips the open volume's exclusion flag. Returns the new state.
    pub fn toggle_exclusion(&mut self) -> bool {
        self.exclusions.toggle(self.volume)
    }

    pub fn exclude_volume(&mut self, volume: usize) {
        self.exclusions.insert(volume);
    }

    // Slider tick queries for the view.

    pub fn volumes_with_labels(&self) -> BTreeSet<usize> {
        self.labels.volumes_with_labels()
    }

    pub fn excluded_volumes(&self) -> &BTreeSet<usize> {
        self.exclusions.excluded()
    }

    /// Writes the kept volumes of the open file under `output_root`,
    /// mirroring the file's path relative to the discovery root, and
    /// row-filters any gradient tables beside it. Returns the export path.
    pub fn export_filtered(&self, output_root: &Path) -> Result<PathBuf, PersistenceError> {
        let Some(store) = &self.store else {
            return Ok(output_root.to_path_buf());
        };

        let relative = self
            .root
            .as_deref()
            .and_then(|root| store.path().strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .or_else(|| store.path().file_name().map(PathBuf::from))
            .unwrap_or_default();
        let export_path = output_root.join(relative);

        let good = store.good_volumes(self.exclusions.excluded());
        log::info!(
            "Exporting {} of {} volume(s) to {}",
            good.len(),
            store.volume_count(),
            export_path.display()
        );
        let filtered = store.filter_volumes(self.exclusions.excluded());
        store.write_with_header(&filtered, &export_path)?;

        if let Some(tables) = &self.gradients {
            if tables.volume_count() == store.volume_count() {
                tables.filter(&good).write_beside(&export_path)?;
            } else {
                log::warn!(
                    "gradient tables list {} volume(s), scan has {}; not exporting them",
                    tables.volume_count(),
                    store.volume_count()
                );
            }
        }
        Ok(export_path)
    }

    #[cfg(test)]
    fn with_store(store: VolumeStore) -> Self {
        let path = store.path().to_path_buf();
        let mut controller = Self {
            files: vec![path.clone()],
            selected: Some(0),
            ..Self::default()
        };
        controller.labels.set_file_path(&path);
        controller.exclusions.set_file_path(&path);
        for orientation in Orientation::ALL {
            controller.slices[plane_index(orientation)] = store.slice_extent(orientation) / 2;
        }
        controller.store = Some(store);
        controller
    }
}

fn plane_index(orientation: Orientation) -> usize {
    match orientation {
        Orientation::Axial => 0,
        Orientation::Sagittal => 1,
        Orientation::Coronal => 2,
    }
}

/// Every `.nii` / `.nii.gz` under `root`, recursively, sorted by path.
/// Unreadable directories are logged and skipped.
pub fn discover_nii_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_nii_files(root, &mut files);
    files.sort();
    files
}

fn collect_nii_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("{}: skipping unreadable directory ({err})", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_nii_files(&path, files);
        } else {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".nii") || name.ends_with(".nii.gz") {
                files.push(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use std::fs;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("niftiscope-controller-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn store_at(path: &Path) -> VolumeStore {
        VolumeStore::from_parts(path, Array4::from_elem((6, 8, 10, 4), 1.0f32))
    }

    #[test]
    fn navigation_clamps_to_extents() {
        let dir = temp_dir("nav");
        let mut controller = ReviewController::with_store(store_at(&dir.join("scan.nii")));

        // Default position is the middle slice of each plane.
        assert_eq!(controller.slice(Orientation::Axial), 5);
        assert_eq!(controller.slice(Orientation::Sagittal), 3);
        assert_eq!(controller.slice(Orientation::Coronal), 4);

        controller.set_volume(99);
        assert_eq!(controller.volume(), 3);
        controller.set_slice(Orientation::Axial, 99);
        assert_eq!(controller.slice(Orientation::Axial), 9);
    }

    #[test]
    fn brightness_rescale_matches_formula() {
        let brightness = Brightness {
            p90: 200.0,
            slider: 50.0,
            max: 400.0,
        };
        // Raw window 50 + 20 = 70; halved p90 halves the raw window:
        // 100/200 * 70 - 20 = 15.
        let rescaled = brightness.rescale_to(100.0);
        assert_eq!(rescaled.slider, 15.0);
        assert_eq!(rescaled.p90, 100.0);
        assert_eq!(rescaled.max, 200.0);

        // Clamped to the slider bounds instead of going negative.
        let dark = Brightness {
            p90: 1000.0,
            slider: 0.0,
            max: 2000.0,
        };
        assert_eq!(dark.rescale_to(10.0).slider, 0.0);

        // Auto window puts the white point at the volume's p90.
        assert_eq!(Brightness::auto(140.0).white_point(), 140.0);
    }

    #[test]
    fn failed_save_aborts_file_switch() {
        let missing = std::env::temp_dir()
            .join("niftiscope-controller-no-such-dir")
            .join("scan.nii");
        let mut controller = ReviewController::with_store(store_at(&missing));
        controller
            .files
            .push(temp_dir("switch-target").join("other.nii"));
        controller.set_label(Orientation::Axial, LabelKind::Blur, true);
        assert!(controller.has_unsaved_changes());

        let result = controller.open_file(1);
        assert!(matches!(result, Err(SwitchError::Save(_))));

        // Nothing moved: same file, labels still in memory and dirty.
        assert_eq!(controller.selected(), Some(0));
        assert_eq!(controller.store().unwrap().path(), missing.as_path());
        assert!(controller.has_unsaved_changes());
        assert!(controller
            .current_labels(Orientation::Axial)
            .labels
            .contains(&LabelKind::Blur));
    }

    #[test]
    fn failed_load_rehydrates_old_ledgers() {
        let dir = temp_dir("rehydrate");
        let old_path = dir.join("old.nii");
        let mut controller = ReviewController::with_store(store_at(&old_path));
        controller.files.push(dir.join("does-not-exist.nii"));

        controller.set_label(Orientation::Sagittal, LabelKind::Dimmed, true);
        let key = controller.current_key(Orientation::Sagittal);

        let result = controller.open_file(1);
        assert!(matches!(result, Err(SwitchError::Load(_))));

        // The save went through, the load failed, and the re-hydrated ledger
        // still answers for the old file.
        assert!(!controller.has_unsaved_changes());
        assert!(controller
            .current_labels(Orientation::Sagittal)
            .labels
            .contains(&LabelKind::Dimmed));
        assert_eq!(controller.labels.labels_for(key).labels.len(), 1);
        assert_eq!(controller.selected(), Some(0));
    }

    #[test]
    fn export_mirrors_relative_path_and_filters_gradients() {
        let input_root = temp_dir("export-in");
        let subject = input_root.join("subject01");
        fs::create_dir_all(&subject).unwrap();
        let scan_path = subject.join("dwi.nii");

        let mut controller = ReviewController::with_store(store_at(&scan_path));
        controller.root = Some(input_root.clone());
        controller.gradients = Some(GradientTables::from_parts(
            vec![0.0, 750.0, 750.0, 750.0],
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
        ));
        controller.exclude_volume(2);

        let output_root = temp_dir("export-out");
        let export_path = controller.export_filtered(&output_root).unwrap();
        assert_eq!(export_path, output_root.join("subject01").join("dwi.nii"));
        assert!(export_path.is_file());

        let exported_tables = GradientTables::locate(&export_path).unwrap().unwrap();
        assert_eq!(exported_tables.volume_count(), 3);
    }

    #[test]
    fn discovery_is_recursive_and_sorted() {
        let root = temp_dir("discover");
        let nested = root.join("b").join("deep");
        fs::create_dir_all(&nested).unwrap();
        fs::write(root.join("a.nii"), b"x").unwrap();
        fs::write(nested.join("c.nii.gz"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();

        let files = discover_nii_files(&root);
        assert_eq!(
            files,
            vec![root.join("a.nii"), nested.join("c.nii.gz")]
        );
    }
}
