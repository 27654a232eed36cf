use std::path::PathBuf;
use std::sync::Arc;

use iced::futures::{SinkExt, Stream};
use iced::widget::text::Wrapping;
use iced::widget::{button, column, container, row, scrollable, text};
use iced::{application, window, Element, Length, Subscription, Task, Theme};
use ndarray::Array4;
use rfd::AsyncFileDialog;

use crate::controller::{ReviewController, ReviewMode};
use crate::detect::{
    load_classifier, run_file, Classifier, DetectConfig, DetectionEvent, DetectionOrchestrator,
    InferenceEngine,
};
use crate::message::Message;
use crate::model::Orientation;
use crate::slice_pipeline::slice_to_handle;
use crate::views::{file_panel, plane_panel, volume_panel};

const APP_TITLE: &str = "NiftiScope";

pub fn run() -> iced::Result {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .try_init();

    application(APP_TITLE, App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        // Close requests flush the ledgers before the window goes away.
        .window(window::Settings {
            exit_on_close_request: false,
            ..window::Settings::default()
        })
        .run()
}

#[derive(Default)]
pub struct App {
    controller: ReviewController,
    orchestrator: DetectionOrchestrator,
    review_mode: ReviewMode,
    export_root: Option<PathBuf>,
    last_error: Option<String>,
}

impl App {
    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::PickFolder => Task::perform(
                async {
                    AsyncFileDialog::new()
                        .pick_folder()
                        .await
                        .map(|handle| handle.path().to_path_buf())
                },
                Message::FolderSelected,
            ),
            Message::FolderSelected(Some(root)) => {
                // The dialog resolves asynchronously and may land mid-run;
                // swapping the store under the worker is refused like any
                // other file switch.
                if self.orchestrator.is_busy() {
                    log::warn!("folder selection ignored while detection runs");
                    return Task::none();
                }
                self.controller.set_root(root);
                if !self.controller.files().is_empty() {
                    self.open_file(0);
                }
                Task::none()
            }
            Message::FolderSelected(None) | Message::ExportFolderSelected(None) => Task::none(),
            Message::SelectFile(index) => {
                if !self.orchestrator.is_busy() {
                    self.open_file(index);
                }
                Task::none()
            }
            Message::VolumeChanged(volume) => {
                self.controller.set_volume(volume);
                Task::none()
            }
            Message::SliceChanged(orientation, slice) => {
                self.controller.set_slice(orientation, slice);
                Task::none()
            }
            Message::BrightnessChanged(value) => {
                self.controller.set_brightness_slider(value);
                Task::none()
            }
            Message::ToggleLabel(orientation, kind, present) => {
                self.controller.set_label(orientation, kind, present);
                Task::none()
            }
            Message::CommentEdited(orientation, comment) => {
                self.controller.set_comment(orientation, comment);
                Task::none()
            }
            Message::ToggleExclusion => {
                self.controller.toggle_exclusion();
                Task::none()
            }
            Message::SetReviewMode(mode) => {
                if !self.orchestrator.is_busy() {
                    self.review_mode = mode;
                }
                Task::none()
            }
            Message::SaveAnnotations => {
                if let Err(err) = self.controller.save_annotations() {
                    self.last_error = Some(err.to_string());
                }
                Task::none()
            }
            Message::StartDetection => self.start_detection(),
            Message::Detection(event) => self.on_detection_event(event),
            Message::PickExportFolder => Task::perform(
                async {
                    AsyncFileDialog::new()
                        .pick_folder()
                        .await
                        .map(|handle| handle.path().to_path_buf())
                },
                Message::ExportFolderSelected,
            ),
            Message::ExportFolderSelected(Some(root)) => {
                self.export_root = Some(root);
                Task::none()
            }
            Message::Export => {
                let Some(root) = self.export_root.clone() else {
                    return Task::none();
                };
                match self.controller.export_filtered(&root) {
                    Ok(path) => log::info!("Exported kept volumes to {}", path.display()),
                    Err(err) => self.last_error = Some(err.to_string()),
                }
                Task::none()
            }
            Message::DismissError => {
                self.last_error = None;
                Task::none()
            }
            Message::CloseRequested(id) => {
                if let Err(err) = self.controller.save_annotations() {
                    log::error!("could not save annotations on exit: {err}");
                }
                window::close(id)
            }
        }
    }

    pub fn view(&self) -> Element<'_, Message> {
        let busy = self.orchestrator.is_busy();

        let files = container(scrollable(file_panel(
            self.controller.files(),
            self.controller.root(),
            self.controller.selected(),
            busy,
        )))
        .padding(16)
        .width(Length::FillPortion(2));

        let mut planes = row![].spacing(16).height(Length::Fill);
        for orientation in Orientation::ALL {
            planes = planes.push(self.plane(orientation));
        }
        let planes = container(planes)
            .padding(16)
            .width(Length::FillPortion(7));

        let labeled = self.controller.volumes_with_labels();
        let controls_body: Element<'_, Message> = match self.controller.store() {
            Some(store) => scrollable(volume_panel(
                self.controller.volume(),
                store.volume_count(),
                &labeled,
                self.controller.excluded_volumes(),
                self.orchestrator.verdicts(),
                self.controller.brightness(),
                self.review_mode,
                self.export_root.as_deref(),
                busy,
            ))
            .into(),
            None => text("No file open").into(),
        };
        let controls = container(controls_body)
            .padding(16)
            .width(Length::FillPortion(3));

        let mut content = column![row![files, planes, controls]
            .spacing(16)
            .width(Length::Fill)
            .height(Length::Fill)]
        .spacing(16);

        if busy {
            content = content.push(text(format!(
                "Detecting: {} / {} volume(s)",
                self.orchestrator.completed(),
                self.orchestrator.expected()
            )));
        }

        if let Some(error) = &self.last_error {
            content = content.push(row![
                text(error).size(16).wrapping(Wrapping::Word),
                button("Dismiss").on_press(Message::DismissError),
            ]
            .spacing(12));
        }

        content.padding(20).into()
    }

    pub fn theme(&self) -> Theme {
        Theme::Dark
    }

    pub fn subscription(&self) -> Subscription<Message> {
        window::close_requests().map(Message::CloseRequested)
    }

    fn plane(&self, orientation: Orientation) -> Element<'_, Message> {
        let Some(store) = self.controller.store() else {
            return text("Open a folder to start reviewing").into();
        };
        let slice = self.controller.slice(orientation);
        let extent = store.slice_extent(orientation);
        let handle = store
            .extract_slice(orientation, slice, self.controller.volume())
            .ok()
            .map(|plane| {
                slice_to_handle(
                    plane.view(),
                    self.controller.brightness().white_point(),
                    Some(self.crosshair(orientation)),
                )
            });
        let labels = self.controller.current_labels(orientation);
        plane_panel(orientation, handle, slice, extent, &labels)
            .width(Length::FillPortion(1))
            .into()
    }

    /// Where the two sibling planes intersect this one, in (row, column)
    /// pixel coordinates of the extracted slice.
    fn crosshair(&self, orientation: Orientation) -> (usize, usize) {
        let sagittal = self.controller.slice(Orientation::Sagittal);
        let coronal = self.controller.slice(Orientation::Coronal);
        let axial = self.controller.slice(Orientation::Axial);
        match orientation {
            Orientation::Axial => (sagittal, coronal),
            Orientation::Sagittal => (coronal, axial),
            Orientation::Coronal => (sagittal, axial),
        }
    }

    fn open_file(&mut self, index: usize) {
        match self.controller.open_file(index) {
            Ok(()) => {
                // Verdicts index the previous file's volumes.
                self.orchestrator.clear_verdicts();
                self.last_error = None;
            }
            Err(err) => self.last_error = Some(err.to_string()),
        }
    }

    fn start_detection(&mut self) -> Task<Message> {
        let Some(store) = self.controller.store() else {
            return Task::none();
        };
        if self.orchestrator.begin(store.volume_count()).is_none() {
            // A run is already in flight; the request is dropped, not queued.
            return Task::none();
        }
        let stream = detection_stream(
            store.data(),
            self.orchestrator.classifier(),
            self.orchestrator.config().clone(),
        );
        Task::run(stream, Message::Detection)
    }

    fn on_detection_event(&mut self, event: DetectionEvent) -> Task<Message> {
        match event {
            DetectionEvent::ModelLoaded(classifier) => {
                self.orchestrator.on_model_loaded(classifier);
                Task::none()
            }
            DetectionEvent::ModelLoadFailed(reason) => {
                self.orchestrator.on_model_failed();
                self.last_error = Some(reason);
                Task::none()
            }
            DetectionEvent::VolumePredicted { index, scores } => {
                self.orchestrator.on_volume_predicted(index, scores);
                Task::none()
            }
            DetectionEvent::FileFinished => {
                let batch = self.review_mode == ReviewMode::Batch;
                self.orchestrator.finish_file(batch);
                if batch {
                    self.advance_batch()
                } else {
                    Task::none()
                }
            }
        }
    }

    /// Batch step after one file's verdicts land: auto-exclude, export if an
    /// output root is set, then move to the next file and keep detecting.
    fn advance_batch(&mut self) -> Task<Message> {
        for volume in self.orchestrator.auto_exclusions() {
            self.controller.exclude_volume(volume);
        }
        if let Some(root) = self.export_root.clone() {
            if let Err(err) = self.controller.export_filtered(&root) {
                self.last_error = Some(err.to_string());
                self.orchestrator.finish_batch();
                return Task::none();
            }
        }

        let next = self.controller.selected().map(|i| i + 1).unwrap_or(0);
        if next >= self.controller.files().len() {
            log::info!("Batch detection finished");
            self.orchestrator.finish_batch();
            return Task::none();
        }
        match self.controller.open_file(next) {
            Ok(()) => self.start_detection(),
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.orchestrator.finish_batch();
                Task::none()
            }
        }
    }
}

/// Runs the blocking two-phase detection pipeline off the interactive thread
/// and forwards its ordered events. The classifier is loaded on the first run
/// of a session and handed back through `ModelLoaded`.
fn detection_stream(
    data: Arc<Array4<f32>>,
    classifier: Option<Arc<dyn Classifier>>,
    config: DetectConfig,
) -> impl Stream<Item = DetectionEvent> {
    iced::stream::channel(64, move |mut output| async move {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let worker = tokio::task::spawn_blocking(move || {
            let mut emit = |event: DetectionEvent| {
                let _ = tx.blocking_send(event);
            };
            let classifier = match classifier {
                Some(classifier) => classifier,
                None => match load_classifier(&config.model_path) {
                    Ok(classifier) => {
                        emit(DetectionEvent::ModelLoaded(Arc::clone(&classifier)));
                        classifier
                    }
                    Err(err) => {
                        log::error!("{err}");
                        emit(DetectionEvent::ModelLoadFailed(err.to_string()));
                        return;
                    }
                },
            };
            let engine = InferenceEngine::new(classifier, config.plan);
            run_file(&data, &engine, &mut emit);
        });

        while let Some(event) = rx.recv().await {
            let _ = output.send(event).await;
        }
        if let Err(err) = worker.await {
            log::error!("detection worker failed: {err}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::model::VolumeStore;
    use ndarray::{Array3, Array4};
    use std::fs;
    use std::path::Path;

    #[derive(Debug)]
    struct FixedClassifier;

    impl Classifier for FixedClassifier {
        fn predict_batch(&self, batch: &Array3<f32>) -> Result<Vec<f32>, InferenceError> {
            Ok(vec![0.9; batch.shape()[0]])
        }
    }

    fn write_scan(path: &Path) {
        let data = Array4::<f32>::from_elem((4, 4, 4, 3), 1.0);
        let store = VolumeStore::from_parts(path, data.clone());
        store.write_with_header(&data, path).unwrap();
    }

    fn scan_dir(name: &str, files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "niftiscope-app-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            write_scan(&dir.join(file));
        }
        dir
    }

    #[test]
    fn folder_selection_is_dropped_while_detection_runs() {
        let dir = scan_dir("busy-folder", &["a.nii"]);
        let mut app = App::default();
        app.orchestrator.begin(2);
        assert!(app.orchestrator.is_busy());

        // The async dialog can resolve mid-run; the root must not change.
        let _ = app.update(Message::FolderSelected(Some(dir)));
        assert!(app.controller.root().is_none());
        assert!(app.controller.files().is_empty());
        assert!(app.controller.selected().is_none());
    }

    #[test]
    fn switching_files_drops_the_previous_verdicts() {
        let dir = scan_dir("verdict-switch", &["a.nii", "b.nii"]);
        let mut app = App::default();
        let _ = app.update(Message::FolderSelected(Some(dir)));
        assert_eq!(app.controller.selected(), Some(0));

        app.orchestrator.begin(3);
        app.orchestrator.on_model_loaded(Arc::new(FixedClassifier));
        for v in 0..3 {
            app.orchestrator.on_volume_predicted(v, Some(vec![0.9, 0.9]));
        }
        app.orchestrator.finish_file(false);
        assert_eq!(app.orchestrator.verdicts().len(), 3);

        // The second file has its own volumes; markers from the first must
        // not be shown against it.
        let _ = app.update(Message::SelectFile(1));
        assert_eq!(app.controller.selected(), Some(1));
        assert!(app.orchestrator.verdicts().is_empty());
    }
}
