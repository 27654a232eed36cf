use std::path::{Path, PathBuf};

use iced::widget::text::Wrapping;
use iced::widget::{button, column, text, Column};
use iced::Length;

use crate::message::Message;
use crate::utils::formatting::file_label;

pub fn file_panel<'a>(
    files: &'a [PathBuf],
    root: Option<&Path>,
    selected: Option<usize>,
    busy: bool,
) -> Column<'a, Message> {
    let mut panel = column![
        text("Volume Files").size(20),
        button("Open Folder").on_press_maybe((!busy).then_some(Message::PickFolder)),
    ]
    .spacing(6);

    if files.is_empty() {
        return panel.push(text("No volume files found"));
    }

    for (index, path) in files.iter().enumerate() {
        let label = file_label(path, root);
        let label = if selected == Some(index) {
            format!("▶ {label}")
        } else {
            label
        };
        // Switching files is refused while detection runs; grey the list out
        // rather than surface an error for every click.
        panel = panel.push(
            button(text(label).wrapping(Wrapping::Word).width(Length::Fill))
                .on_press_maybe((!busy).then_some(Message::SelectFile(index))),
        );
    }
    panel
}
