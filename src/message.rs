use std::path::PathBuf;

use crate::controller::ReviewMode;
use crate::detect::DetectionEvent;
use crate::model::{LabelKind, Orientation};

#[derive(Debug, Clone)]
pub enum Message {
    PickFolder,
    FolderSelected(Option<PathBuf>),
    SelectFile(usize),
    VolumeChanged(usize),
    SliceChanged(Orientation, usize),
    BrightnessChanged(f32),
    ToggleLabel(Orientation, LabelKind, bool),
    CommentEdited(Orientation, String),
    ToggleExclusion,
    SetReviewMode(ReviewMode),
    SaveAnnotations,
    StartDetection,
    Detection(DetectionEvent),
    PickExportFolder,
    ExportFolderSelected(Option<PathBuf>),
    Export,
    DismissError,
    CloseRequested(iced::window::Id),
}
