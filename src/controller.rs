// src/controller.rs
//! The capture/predict controller.
//!
//! Owns everything the UI shows: the chosen image, its preview, the camera,
//! the last prediction or error, and the busy flag. Slow work (camera
//! acquisition, frame grabbing, the HTTP round trip) runs on worker threads
//! that write back into the shared [`ControllerState`]; the UI only ever
//! takes short-lived locks to copy a [`Snapshot`] out.

use anyhow::Result;
use chrono::{DateTime, Local};
use image::{DynamicImage, RgbImage};
use log::{error, info, warn};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::camera::{CameraBackend, CameraError, CameraEvent, CameraSession, StreamRequest};
use crate::capture::source::{encode_jpeg, ImageSource};
use crate::predict::connector::Predictor;
use crate::predict::types::{ImageUpload, PredictionResult};

pub const NO_IMAGE_SELECTED: &str = "No image selected.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraStatus {
    #[default]
    Inactive,
    Requesting,
    Active {
        ready: bool,
    },
}

/// What the preview area shows. A new `revision` means "replace the texture".
#[derive(Clone)]
pub struct Preview {
    pub revision: u64,
    pub label: String,
    /// `None` when the chosen file could not be decoded.
    pub image: Option<Arc<DynamicImage>>,
}

#[derive(Default)]
pub struct ControllerState {
    /// The chosen file. Captures never overwrite it.
    upload: Option<ImageSource>,
    /// The last camera photo that was sent.
    photo: Option<ImageSource>,
    preview: Option<Preview>,
    result: Option<PredictionResult>,
    result_at: Option<DateTime<Local>>,
    error: Option<String>,
    busy: bool,
    camera: CameraStatus,
    using_camera_photo: bool,
    preview_revision: u64,
    camera_generation: u64,
}

impl ControllerState {
    /// Show `source` in the preview area, or clear it.
    fn show_preview(&mut self, source: Option<&ImageSource>, image: Option<DynamicImage>) {
        self.preview = source.map(|src| {
            self.preview_revision += 1;
            Preview {
                revision: self.preview_revision,
                label: src.file_name().to_string(),
                image: image.map(Arc::new),
            }
        });
    }

    fn clear_outcome(&mut self) {
        self.result = None;
        self.result_at = None;
        self.error = None;
    }

    fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.error = Some(message);
    }

    /// Returns false when a submission is already running.
    fn begin_submission(&mut self) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;
        self.clear_outcome();
        true
    }
}

/// A copy of the state for rendering.
#[derive(Clone)]
pub struct Snapshot {
    pub source_name: Option<String>,
    pub preview: Option<Preview>,
    pub result: Option<PredictionResult>,
    pub result_at: Option<DateTime<Local>>,
    pub error: Option<String>,
    pub busy: bool,
    pub camera: CameraStatus,
    pub using_camera_photo: bool,
}

impl Snapshot {
    pub fn camera_active(&self) -> bool {
        matches!(self.camera, CameraStatus::Active { .. })
    }

    pub fn camera_ready(&self) -> bool {
        self.camera == CameraStatus::Active { ready: true }
    }

    pub fn can_capture(&self) -> bool {
        self.camera_ready() && !self.busy
    }
}

fn lock_state(state: &Mutex<ControllerState>) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Controller {
    state: Arc<Mutex<ControllerState>>,
    /// Signalled whenever the camera status changes.
    camera_changed: Arc<Condvar>,
    predictor: Arc<dyn Predictor>,
    camera_backend: Arc<dyn CameraBackend>,
    camera: Option<CameraSession>,
    stream_request: StreamRequest,
}

impl Controller {
    pub fn new(predictor: Arc<dyn Predictor>, camera_backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState::default())),
            camera_changed: Arc::new(Condvar::new()),
            predictor,
            camera_backend,
            camera: None,
            stream_request: StreamRequest::default(),
        }
    }

    pub fn with_stream_request(mut self, request: StreamRequest) -> Self {
        self.stream_request = request;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        lock_state(&self.state)
    }

    pub fn snapshot(&self) -> Snapshot {
        let s = self.lock();
        Snapshot {
            source_name: s.upload.as_ref().map(|src| src.file_name().to_string()),
            preview: s.preview.clone(),
            result: s.result.clone(),
            result_at: s.result_at,
            error: s.error.clone(),
            busy: s.busy,
            camera: s.camera,
            using_camera_photo: s.using_camera_photo,
        }
    }

    /// The last photo taken by [`Controller::capture_and_submit`].
    pub fn captured_photo(&self) -> Option<ImageSource> {
        self.lock().photo.clone()
    }

    /// Choose (or clear, with `None`) the uploaded file.
    pub fn select_file(&self, file: Option<ImageSource>) {
        let image = file.as_ref().and_then(ImageSource::decode_preview);
        let mut s = self.lock();
        s.clear_outcome();
        s.using_camera_photo = false;
        s.show_preview(file.as_ref(), image);
        s.upload = file;
    }

    /// Load a file from disk and select it. A read failure is reported in the
    /// error slot and leaves the previous selection alone.
    pub fn select_path(&self, path: &Path) -> Result<()> {
        match ImageSource::from_path(path) {
            Ok(source) => {
                self.select_file(Some(source));
                Ok(())
            }
            Err(e) => {
                self.lock().fail(format!("{:#}", e));
                Err(e)
            }
        }
    }

    /// Predict the uploaded file. A photo taken since then is not resent.
    pub fn submit_upload(&self) -> Option<JoinHandle<()>> {
        let upload = {
            let mut s = self.lock();
            if s.busy {
                warn!("A prediction is already running; ignoring submit");
                return None;
            }
            let Some(upload) = s.upload.as_ref().map(ImageSource::to_upload) else {
                s.fail(NO_IMAGE_SELECTED);
                return None;
            };
            s.using_camera_photo = false;
            upload
        };
        self.submit_to_backend(upload)
    }

    /// Send one image to the predictor on a worker thread.
    ///
    /// Rejected (returns `None`, nothing sent) while another submission is
    /// still running. The busy flag is cleared on every outcome.
    pub fn submit_to_backend(&self, upload: ImageUpload) -> Option<JoinHandle<()>> {
        if !self.lock().begin_submission() {
            warn!("A prediction is already running; ignoring {}", upload.file_name);
            return None;
        }

        let predictor = Arc::clone(&self.predictor);
        let state = Arc::clone(&self.state);
        Some(thread::spawn(move || {
            let outcome = predictor.predict(&upload);
            let mut s = lock_state(&state);
            match outcome {
                Ok(result) => {
                    info!(
                        "Predicted {} ({})",
                        result.predicted_class,
                        result.confidence_label()
                    );
                    s.result = Some(result);
                    s.result_at = Some(Local::now());
                }
                Err(e) => {
                    error!("Prediction failed: {}", e);
                    s.error = Some(e.to_string());
                }
            }
            s.busy = false;
        }))
    }

    /// Start acquiring the camera. Readiness arrives later, from the worker.
    pub fn activate_camera(&mut self) {
        if matches!(self.lock().camera, CameraStatus::Requesting | CameraStatus::Active { .. }) {
            return;
        }
        // A session that died on its own is still parked here
        if let Some(stale) = self.camera.take() {
            stale.release();
        }

        if !self.camera_backend.is_supported() {
            self.lock().fail(CameraError::Unsupported.to_string());
            return;
        }

        let generation = {
            let mut s = self.lock();
            s.camera_generation += 1;
            s.camera = CameraStatus::Requesting;
            s.camera_generation
        };

        let state = Arc::clone(&self.state);
        let camera_changed = Arc::clone(&self.camera_changed);
        let session = CameraSession::start(
            Arc::clone(&self.camera_backend),
            self.stream_request.clone(),
            move |event| {
                let mut s = lock_state(&state);
                if s.camera_generation != generation {
                    return;
                }
                match event {
                    CameraEvent::Opened => s.camera = CameraStatus::Active { ready: false },
                    CameraEvent::Ready => s.camera = CameraStatus::Active { ready: true },
                    CameraEvent::Failed(e) | CameraEvent::Lost(e) => {
                        s.camera = CameraStatus::Inactive;
                        s.fail(e.to_string());
                    }
                }
                camera_changed.notify_all();
            },
        );
        self.camera = Some(session);
    }

    /// Stop the camera and release the device. Safe to call at any time and
    /// never blocks: the device is released in the background.
    pub fn deactivate_camera(&mut self) {
        if let Some(session) = self.take_camera() {
            info!("Stopping camera");
            session.release();
        }
    }

    fn take_camera(&mut self) -> Option<CameraSession> {
        let session = self.camera.take();
        {
            let mut s = self.lock();
            s.camera_generation += 1;
            s.camera = CameraStatus::Inactive;
        }
        self.camera_changed.notify_all();
        session
    }

    pub fn toggle_camera(&mut self) {
        if self.snapshot().camera == CameraStatus::Inactive {
            self.activate_camera();
        } else {
            self.deactivate_camera();
        }
    }

    /// Block until the camera is ready, gave up, or `timeout` passed.
    pub fn wait_for_camera(&self, timeout: Duration) -> Result<(), CameraError> {
        let deadline = Instant::now() + timeout;
        let mut s = self.lock();
        loop {
            match s.camera {
                CameraStatus::Active { ready: true } => return Ok(()),
                CameraStatus::Inactive => return Err(CameraError::NotActive),
                _ => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CameraError::NotReady);
            }
            s = self
                .camera_changed
                .wait_timeout(s, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Latest live frame, for the camera view.
    pub fn live_frame(&self) -> Option<(u64, Arc<RgbImage>)> {
        self.camera.as_ref().and_then(CameraSession::latest_frame)
    }

    fn frame_for_capture(&self) -> Result<Arc<RgbImage>, CameraError> {
        if !matches!(self.lock().camera, CameraStatus::Active { .. }) {
            return Err(CameraError::NotActive);
        }
        let (_, frame) = self.live_frame().ok_or(CameraError::NotReady)?;
        if frame.width() == 0 || frame.height() == 0 {
            return Err(CameraError::NotReady);
        }
        Ok(frame)
    }

    /// Photograph the current camera frame and predict it. The preview shows
    /// exactly the raster that is sent.
    pub fn capture_and_submit(&self) -> Option<JoinHandle<()>> {
        if self.lock().busy {
            warn!("A prediction is already running; ignoring capture");
            return None;
        }

        let frame = match self.frame_for_capture() {
            Ok(frame) => frame,
            Err(e) => {
                self.lock().fail(e.to_string());
                return None;
            }
        };

        let raster = DynamicImage::ImageRgb8(frame.as_ref().clone());
        let bytes = match encode_jpeg(&raster) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.lock().fail(CameraError::Encode(e.to_string()).to_string());
                return None;
            }
        };
        info!("Captured {}x{} camera frame", raster.width(), raster.height());

        let photo = ImageSource::CapturedFrame { bytes };
        let upload = photo.to_upload();
        {
            let mut s = self.lock();
            s.show_preview(Some(&photo), Some(raster));
            s.photo = Some(photo);
            s.using_camera_photo = true;
            s.clear_outcome();
        }
        self.submit_to_backend(upload)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // Last chance to release the device, so wait for it
        if let Some(session) = self.take_camera() {
            session.stop();
        }
    }
}
