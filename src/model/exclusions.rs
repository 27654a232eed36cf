use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::model::side_car_path;

const EXCLUSIONS_SUFFIX: &str = "_badvolumes.csv";
const HEADER: [&str; 1] = ["bad_volume_num"];

/// In-memory set of volume indices flagged for exclusion in the open file,
/// persisted to a `<stem>_badvolumes.csv` side-car. Same contract as
/// `LabelLedger`: mutation flags dirty first, a successful save spends the
/// ledger, `set_file_path` re-hydrates.
#[derive(Debug, Default)]
pub struct ExclusionLedger {
    file_path: Option<PathBuf>,
    dirty: bool,
    excluded: BTreeSet<usize>,
}

impl ExclusionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_file_path(&mut self, path: &Path) {
        self.excluded.clear();
        self.file_path = Some(path.to_path_buf());
        self.dirty = false;
        self.read_side_car();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn contains(&self, volume: usize) -> bool {
        self.excluded.contains(&volume)
    }

    pub fn excluded(&self) -> &BTreeSet<usize> {
        &self.excluded
    }

    pub fn insert(&mut self, volume: usize) {
        self.dirty = true;
        self.excluded.insert(volume);
    }

    pub fn remove(&mut self, volume: usize) {
        self.dirty = true;
        self.excluded.remove(&volume);
    }

    /// Adds `volume` if absent, removes it otherwise. Returns the new state.
    pub fn toggle(&mut self, volume: usize) -> bool {
        self.dirty = true;
        if !self.excluded.remove(&volume) {
            self.excluded.insert(volume);
            true
        } else {
            false
        }
    }

    pub fn save(&mut self) -> Result<(), PersistenceError> {
        let Some(volume_path) = &self.file_path else {
            return Ok(());
        };
        let path = side_car_path(volume_path, EXCLUSIONS_SUFFIX);
        let wrap = |source| PersistenceError::SideCar {
            path: path.clone(),
            source,
        };

        let mut writer = csv::Writer::from_path(&path).map_err(wrap)?;
        writer.write_record(HEADER).map_err(wrap)?;
        for volume in &self.excluded {
            writer.write_record([volume.to_string()]).map_err(wrap)?;
        }
        writer.flush().map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;

        self.excluded.clear();
        self.dirty = false;
        Ok(())
    }

    fn read_side_car(&mut self) {
        let Some(volume_path) = &self.file_path else {
            return;
        };
        let path = side_car_path(volume_path, EXCLUSIONS_SUFFIX);
        let Ok(mut reader) = csv::ReaderBuilder::new().flexible(true).from_path(&path) else {
            return;
        };

        for row in reader.records() {
            let Ok(row) = row else {
                log::warn!("{}: skipping unreadable exclusion row", path.display());
                continue;
            };
            if let Some(volume) = row.get(0).and_then(|text| text.parse().ok()) {
                self.excluded.insert(volume);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_volume_path(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("niftiscope-exclusions-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn round_trip_preserves_set() {
        let volume_path = temp_volume_path("roundtrip.nii");
        let mut ledger = ExclusionLedger::new();
        ledger.set_file_path(&volume_path);

        ledger.insert(7);
        ledger.insert(2);
        assert!(ledger.toggle(11));
        assert!(ledger.is_dirty());

        ledger.save().unwrap();
        assert!(!ledger.is_dirty());

        ledger.set_file_path(&volume_path);
        assert!(!ledger.is_dirty());
        assert_eq!(
            ledger.excluded().iter().copied().collect::<Vec<_>>(),
            vec![2, 7, 11]
        );
    }

    #[test]
    fn toggle_removes_present_volume() {
        let mut ledger = ExclusionLedger::new();
        ledger.insert(3);
        assert!(!ledger.toggle(3));
        assert!(!ledger.contains(3));
    }

    #[test]
    fn load_is_not_a_user_change() {
        let volume_path = temp_volume_path("load-clean.nii");
        let mut ledger = ExclusionLedger::new();
        ledger.set_file_path(&volume_path);
        ledger.insert(0);
        ledger.save().unwrap();

        ledger.set_file_path(&volume_path);
        assert!(ledger.contains(0));
        assert!(!ledger.is_dirty());
    }
}
