use iced::widget::image::Handle;
use iced::widget::{checkbox, column, row, slider, text, text_input, Column, Image};
use iced::{Element, Length};

use crate::message::Message;
use crate::model::{LabelKind, Orientation, SliceLabels};

/// One viewing plane: the rendered slice, its slice slider and the label
/// controls addressing the displayed slice.
pub fn plane_panel<'a>(
    orientation: Orientation,
    handle: Option<Handle>,
    slice: usize,
    extent: usize,
    labels: &SliceLabels,
) -> Column<'a, Message> {
    let image: Element<'a, Message> = match handle {
        Some(handle) => Image::new(handle)
            .width(Length::Fill)
            .height(Length::Fill)
            .into(),
        None => text("No slice to display").into(),
    };

    let max = extent.saturating_sub(1) as u16;
    let slice_slider = slider(0..=max, slice as u16, move |value| {
        Message::SliceChanged(orientation, value as usize)
    });

    let mut label_row = row![].spacing(10);
    for kind in LabelKind::ALL {
        let checked = labels.labels.contains(&kind);
        label_row = label_row.push(
            checkbox(kind.display_name(), checked)
                .on_toggle(move |on| Message::ToggleLabel(orientation, kind, on)),
        );
    }

    let comment = text_input("Comment", &labels.comment)
        .on_input(move |value| Message::CommentEdited(orientation, value));

    column![
        text(format!("{}: slice {} / {}", orientation.as_str(), slice + 1, extent)).size(16),
        image,
        slice_slider,
        label_row,
        comment,
    ]
    .spacing(6)
}
