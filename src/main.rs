mod app;
mod components;
mod controller;
mod detect;
mod error;
mod message;
mod model;
mod slice_pipeline;
mod utils;
mod views;

pub fn main() -> iced::Result {
    app::run()
}
