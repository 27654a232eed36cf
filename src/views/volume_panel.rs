use std::collections::BTreeSet;
use std::path::Path;

use iced::widget::{button, column, slider, text, Column};

use crate::components::segmented_toggle::review_mode_toggle;
use crate::controller::{Brightness, ReviewMode};
use crate::detect::VolumeVerdict;
use crate::message::Message;
use crate::utils::formatting::{tick_summary, volume_status};

/// Per-file review controls: volume navigation, exclusion, brightness,
/// detection and export.
#[allow(clippy::too_many_arguments)]
pub fn volume_panel<'a>(
    volume: usize,
    volume_count: usize,
    labeled: &BTreeSet<usize>,
    excluded: &BTreeSet<usize>,
    verdicts: &'a [VolumeVerdict],
    brightness: Brightness,
    review_mode: ReviewMode,
    export_root: Option<&Path>,
    busy: bool,
) -> Column<'a, Message> {
    let is_excluded = excluded.contains(&volume);
    let status = volume_status(volume, volume_count, labeled, is_excluded, verdicts.get(volume));

    let max = volume_count.saturating_sub(1) as u16;
    let volume_slider = slider(0..=max, volume as u16, |value| {
        Message::VolumeChanged(value as usize)
    });

    let exclude_label = if is_excluded {
        "Keep This Volume"
    } else {
        "Exclude This Volume"
    };

    let brightness_slider = slider(
        0.0..=brightness.max,
        brightness.slider,
        Message::BrightnessChanged,
    )
    .step(brightness.max / 200.0);

    let export_label = export_root
        .map(|root| format!("Export Kept Volumes to {}", root.display()))
        .unwrap_or_else(|| String::from("Choose Export Folder First"));

    column![
        text(status).size(16),
        volume_slider,
        text(tick_summary(labeled, excluded, verdicts)).size(14),
        button(exclude_label).on_press(Message::ToggleExclusion),
        text("Brightness").size(14),
        brightness_slider,
        review_mode_toggle(review_mode),
        button("Detect Motion").on_press_maybe((!busy).then_some(Message::StartDetection)),
        button("Save Annotations").on_press_maybe((!busy).then_some(Message::SaveAnnotations)),
        button("Export Folder...").on_press(Message::PickExportFolder),
        button(text(export_label))
            .on_press_maybe((!busy && export_root.is_some()).then_some(Message::Export)),
    ]
    .spacing(8)
}
