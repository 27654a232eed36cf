pub mod file_panel;
pub mod plane_panel;
pub mod volume_panel;

pub use file_panel::file_panel;
pub use plane_panel::plane_panel;
pub use volume_panel::volume_panel;
