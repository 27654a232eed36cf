use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::model::{side_car_path, Orientation};

const LABELS_SUFFIX: &str = "_labels.csv";
const HEADER: [&str; 6] = [
    "slice_sagittal",
    "slice_coronal",
    "slice_axial",
    "volume",
    "labels",
    "comment",
];

/// Fixed motion-artifact vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelKind {
    Blur,
    GapLine,
    Dimmed,
    Tunneling,
}

impl LabelKind {
    pub const ALL: [LabelKind; 4] = [
        LabelKind::Blur,
        LabelKind::GapLine,
        LabelKind::Dimmed,
        LabelKind::Tunneling,
    ];

    /// Side-car token. Must not contain `/`; the labels column is
    /// slash-separated.
    pub fn token(&self) -> &'static str {
        match self {
            LabelKind::Blur => "Blur",
            LabelKind::GapLine => "GapLine",
            LabelKind::Dimmed => "Dimmed",
            LabelKind::Tunneling => "Tunneling",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LabelKind::GapLine => "Gap/Line",
            other => other.token(),
        }
    }

    fn from_token(token: &str) -> Option<LabelKind> {
        LabelKind::ALL.into_iter().find(|kind| kind.token() == token)
    }
}

/// Identity of one displayed 2D slice, stable across navigation within one
/// open file. Map key for label lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceKey {
    pub volume: usize,
    pub orientation: Orientation,
    pub slice: usize,
}

/// Annotations attached to one slice: set labels plus an optional comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceLabels {
    pub labels: BTreeSet<LabelKind>,
    pub comment: String,
}

impl SliceLabels {
    /// Empty records are never persisted; absence means "unlabeled".
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.comment.is_empty()
    }
}

/// In-memory map of slice annotations for the open volume file, persisted to
/// a `<stem>_labels.csv` side-car. Kept in memory across volume navigation so
/// slider scrubbing never touches the disk.
#[derive(Debug, Default)]
pub struct LabelLedger {
    file_path: Option<PathBuf>,
    dirty: bool,
    records: BTreeMap<SliceKey, SliceLabels>,
}

impl LabelLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebinds the ledger to a new volume file: clears in-memory state, reads
    /// the side-car if present and resets the dirty flag. The caller is
    /// responsible for saving the previous file's state first.
    pub fn set_file_path(&mut self, path: &Path) {
        self.records.clear();
        self.file_path = Some(path.to_path_buf());
        self.dirty = false;
        self.read_side_car();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Annotations for `key`; an empty record if the slice was never labeled.
    pub fn labels_for(&self, key: SliceKey) -> SliceLabels {
        self.records.get(&key).cloned().unwrap_or_default()
    }

    pub fn set_label(&mut self, key: SliceKey, kind: LabelKind, present: bool) {
        // Flag first, so no mutation is lost to a crash before flagging.
        self.dirty = true;
        let record = self.records.entry(key).or_default();
        if present {
            record.labels.insert(kind);
        } else {
            record.labels.remove(&kind);
        }
        if record.labels.is_empty() && record.comment.is_empty() {
            self.records.remove(&key);
        }
    }

    pub fn set_comment(&mut self, key: SliceKey, comment: String) {
        self.dirty = true;
        let record = self.records.entry(key).or_default();
        record.comment = comment;
        if record.labels.is_empty() && record.comment.is_empty() {
            self.records.remove(&key);
        }
    }

    /// Volume indices that carry at least one annotation, for slider ticks.
    pub fn volumes_with_labels(&self) -> BTreeSet<usize> {
        self.records.keys().map(|key| key.volume).collect()
    }

    /// Serializes non-empty records to the side-car. On success the ledger is
    /// spent: state and dirty flag are cleared. The controller reloads via
    /// `set_file_path` immediately after every file-path change, so a spent
    /// ledger is never read. This is an invariant of the access pattern,
    /// not an accident.
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        let Some(volume_path) = &self.file_path else {
            return Ok(());
        };
        let path = side_car_path(volume_path, LABELS_SUFFIX);
        let wrap = |source| PersistenceError::SideCar {
            path: path.clone(),
            source,
        };

        let mut writer = csv::Writer::from_path(&path).map_err(wrap)?;
        writer.write_record(HEADER).map_err(wrap)?;
        for (key, record) in &self.records {
            if record.is_empty() {
                continue;
            }
            let slice = key.slice.to_string();
            let (sagittal, coronal, axial) = match key.orientation {
                Orientation::Sagittal => (slice.as_str(), "", ""),
                Orientation::Coronal => ("", slice.as_str(), ""),
                Orientation::Axial => ("", "", slice.as_str()),
            };
            let labels = record
                .labels
                .iter()
                .map(LabelKind::token)
                .collect::<Vec<_>>()
                .join("/");
            writer
                .write_record([
                    sagittal,
                    coronal,
                    axial,
                    &key.volume.to_string(),
                    &labels,
                    &record.comment,
                ])
                .map_err(wrap)?;
        }
        writer.flush().map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;

        self.records.clear();
        self.dirty = false;
        Ok(())
    }

    fn read_side_car(&mut self) {
        let Some(volume_path) = &self.file_path else {
            return;
        };
        let path = side_car_path(volume_path, LABELS_SUFFIX);
        // Absence of the side-car just means no prior labels.
        let Ok(mut reader) = csv::ReaderBuilder::new().flexible(true).from_path(&path) else {
            return;
        };

        for row in reader.records() {
            let Ok(row) = row else {
                log::warn!("{}: skipping unreadable label row", path.display());
                continue;
            };
            if let Some((key, record)) = parse_row(&row) {
                if !record.is_empty() {
                    self.records.insert(key, record);
                }
            }
        }
    }
}

fn parse_row(row: &csv::StringRecord) -> Option<(SliceKey, SliceLabels)> {
    if row.len() < 6 {
        return None;
    }
    let volume: usize = row.get(3)?.parse().ok()?;
    // Exactly one of the three slice columns is populated; it decides the
    // row's orientation.
    let (orientation, slice_text) = [
        (Orientation::Sagittal, row.get(0)?),
        (Orientation::Coronal, row.get(1)?),
        (Orientation::Axial, row.get(2)?),
    ]
    .into_iter()
    .find(|(_, text)| !text.is_empty())?;
    let slice: usize = slice_text.parse().ok()?;

    let labels = row
        .get(4)?
        .split('/')
        .filter_map(LabelKind::from_token)
        .collect();
    let comment = row.get(5)?.to_string();

    Some((
        SliceKey {
            volume,
            orientation,
            slice,
        },
        SliceLabels { labels, comment },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_volume_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("niftiscope-labels-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn key(volume: usize, orientation: Orientation, slice: usize) -> SliceKey {
        SliceKey {
            volume,
            orientation,
            slice,
        }
    }

    #[test]
    fn unlabeled_slices_read_back_empty() {
        let ledger = LabelLedger::new();
        assert!(ledger.labels_for(key(0, Orientation::Axial, 12)).is_empty());
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn round_trip_preserves_non_empty_records() {
        let volume_path = temp_volume_path("roundtrip.nii");
        let mut ledger = LabelLedger::new();
        ledger.set_file_path(&volume_path);

        let a = key(2, Orientation::Axial, 14);
        let b = key(0, Orientation::Sagittal, 30);
        ledger.set_label(a, LabelKind::Blur, true);
        ledger.set_label(a, LabelKind::GapLine, true);
        ledger.set_label(b, LabelKind::Tunneling, true);
        ledger.set_comment(b, "ghosting near midline".to_string());
        let expected_a = ledger.labels_for(a);
        let expected_b = ledger.labels_for(b);
        assert!(ledger.is_dirty());

        ledger.save().unwrap();
        assert!(!ledger.is_dirty());

        ledger.set_file_path(&volume_path);
        assert!(!ledger.is_dirty());
        assert_eq!(ledger.labels_for(a), expected_a);
        assert_eq!(ledger.labels_for(b), expected_b);
    }

    #[test]
    fn toggled_off_records_are_not_persisted() {
        let volume_path = temp_volume_path("sparse.nii");
        let mut ledger = LabelLedger::new();
        ledger.set_file_path(&volume_path);

        let k = key(1, Orientation::Coronal, 5);
        ledger.set_label(k, LabelKind::Dimmed, true);
        ledger.set_label(k, LabelKind::Dimmed, false);
        assert!(ledger.is_dirty());

        ledger.save().unwrap();
        ledger.set_file_path(&volume_path);
        assert!(ledger.labels_for(k).is_empty());
        assert!(ledger.volumes_with_labels().is_empty());
    }

    #[test]
    fn missing_side_car_is_not_an_error() {
        let mut ledger = LabelLedger::new();
        ledger.set_file_path(&temp_volume_path("never-saved.nii"));
        assert!(!ledger.is_dirty());
        assert!(ledger.volumes_with_labels().is_empty());
    }

    #[test]
    fn save_fails_when_directory_is_missing() {
        let mut ledger = LabelLedger::new();
        let bogus = std::env::temp_dir()
            .join("niftiscope-no-such-dir")
            .join("missing")
            .join("scan.nii");
        // Bypass set_file_path's read so the dirty mutation survives.
        ledger.file_path = Some(bogus);
        ledger.set_label(key(0, Orientation::Axial, 1), LabelKind::Blur, true);

        assert!(ledger.save().is_err());
        assert!(ledger.is_dirty());
        assert!(!ledger.labels_for(key(0, Orientation::Axial, 1)).is_empty());
    }
}
