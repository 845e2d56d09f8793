// src/capture/camera.rs
use image::RgbImage;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    #[error("Camera access is not supported on this system.")]
    Unsupported,
    #[error("Could not access the camera. Check camera permissions or make sure a camera is connected.")]
    Access(String),
    #[error("Camera is not active.")]
    NotActive,
    #[error("Video not ready. Wait a moment and try again.")]
    NotReady,
    #[error("Failed to encode the camera photo: {0}")]
    Encode(String),
    #[error("Camera stopped delivering frames: {0}")]
    Frame(String),
}

/// Which way the requested camera should face. A preference, not a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Environment,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub facing: Facing,
    /// Explicit device index; overrides `facing`.
    pub device: Option<usize>,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            facing: Facing::Environment,
            device: None,
        }
    }
}

/// A live video stream. Lives on the camera worker thread only.
pub trait CameraStream {
    /// Block until the next frame arrives.
    fn next_frame(&mut self) -> Result<RgbImage, CameraError>;
    /// Stop every track of the stream and release the device.
    fn stop(&mut self);
}

/// Access to the machine's video capture devices.
pub trait CameraBackend: Send + Sync {
    fn is_supported(&self) -> bool;
    fn list_devices(&self) -> Result<Vec<String>, CameraError>;
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// Choose the device to open: the explicit index if given, else the first
/// device whose name matches the requested facing, else the first device.
pub fn pick_device(names: &[String], request: &StreamRequest) -> Option<usize> {
    if let Some(index) = request.device {
        return (index < names.len()).then_some(index);
    }
    let hints: &[&str] = match request.facing {
        Facing::Environment => &["back", "rear", "environment", "world"],
        Facing::User => &["front", "user", "facetime", "integrated"],
    };
    names
        .iter()
        .position(|name| {
            let lower = name.to_lowercase();
            hints.iter().any(|h| lower.contains(h))
        })
        .or_else(|| (!names.is_empty()).then_some(0))
}

/// Lifecycle notifications from the camera worker.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    /// The device was acquired and is streaming.
    Opened,
    /// The first frame with real dimensions arrived.
    Ready,
    /// Acquisition failed; nothing is held.
    Failed(CameraError),
    /// The stream broke after it was opened; it has been stopped.
    Lost(CameraError),
}

#[derive(Default)]
struct Feed {
    frame: Option<Arc<RgbImage>>,
    sequence: u64,
}

/// An acquired (or being acquired) camera. Dropping it stops the stream and
/// waits for the worker thread, so the device is released on every path.
pub struct CameraSession {
    feed: Arc<Mutex<Feed>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraSession {
    pub fn start<F>(backend: Arc<dyn CameraBackend>, request: StreamRequest, on_event: F) -> Self
    where
        F: Fn(CameraEvent) + Send + 'static,
    {
        let feed = Arc::new(Mutex::new(Feed::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let feed_clone = Arc::clone(&feed);
        let stop_clone = Arc::clone(&stop);
        let worker = thread::spawn(move || {
            run_stream(backend.as_ref(), &request, &feed_clone, &stop_clone, &on_event);
        });

        Self {
            feed,
            stop,
            worker: Some(worker),
        }
    }

    /// Most recent frame and its sequence number.
    pub fn latest_frame(&self) -> Option<(u64, Arc<RgbImage>)> {
        let feed = self.feed.lock().unwrap_or_else(|p| p.into_inner());
        feed.frame.as_ref().map(|f| (feed.sequence, Arc::clone(f)))
    }

    /// Stop the stream and wait until the device is released.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Stop the stream without waiting. The worker is joined on a reaper
    /// thread, so a device that is still being opened cannot stall the caller.
    pub fn release(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            thread::spawn(move || {
                if worker.join().is_err() {
                    warn!("Camera worker panicked while shutting down");
                } else {
                    info!("Camera released");
                }
            });
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Camera worker panicked while shutting down");
            }
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_stream(
    backend: &dyn CameraBackend,
    request: &StreamRequest,
    feed: &Mutex<Feed>,
    stop: &AtomicBool,
    on_event: &dyn Fn(CameraEvent),
) {
    info!("Requesting camera access");
    let mut stream = match backend.open(request) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Camera acquisition failed: {:?}", e);
            on_event(CameraEvent::Failed(e));
            return;
        }
    };

    if stop.load(Ordering::Acquire) {
        //Deactivated while the request was pending
        stream.stop();
        return;
    }
    on_event(CameraEvent::Opened);

    let mut ready = false;
    while !stop.load(Ordering::Acquire) {
        match stream.next_frame() {
            Ok(frame) => {
                let has_pixels = frame.width() > 0 && frame.height() > 0;
                {
                    let mut feed = feed.lock().unwrap_or_else(|p| p.into_inner());
                    feed.frame = Some(Arc::new(frame));
                    feed.sequence += 1;
                }
                if has_pixels && !ready {
                    ready = true;
                    info!("Camera ready");
                    on_event(CameraEvent::Ready);
                }
            }
            Err(e) => {
                warn!("Camera stream error: {}", e);
                on_event(CameraEvent::Lost(e));
                break;
            }
        }
    }

    stream.stop();
    info!("Camera stream stopped");
}

/// Backend used when the build has no camera support.
#[cfg_attr(feature = "camera", allow(dead_code))]
pub struct UnsupportedCamera;

impl CameraBackend for UnsupportedCamera {
    fn is_supported(&self) -> bool {
        false
    }

    fn list_devices(&self) -> Result<Vec<String>, CameraError> {
        Err(CameraError::Unsupported)
    }

    fn open(&self, _request: &StreamRequest) -> Result<Box<dyn CameraStream>, CameraError> {
        Err(CameraError::Unsupported)
    }
}

pub fn default_backend() -> Arc<dyn CameraBackend> {
    #[cfg(feature = "camera")]
    {
        Arc::new(native::NativeCamera)
    }
    #[cfg(not(feature = "camera"))]
    {
        Arc::new(UnsupportedCamera)
    }
}

#[cfg(feature = "camera")]
mod native {
    use super::{pick_device, CameraBackend, CameraError, CameraStream, StreamRequest};
    use image::RgbImage;
    use log::{info, warn};
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{ApiBackend, CameraInfo, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;

    pub struct NativeCamera;

    fn query() -> Result<Vec<CameraInfo>, CameraError> {
        nokhwa::query(ApiBackend::Auto).map_err(|e| CameraError::Access(e.to_string()))
    }

    impl CameraBackend for NativeCamera {
        fn is_supported(&self) -> bool {
            nokhwa::native_api_backend().is_some()
        }

        fn list_devices(&self) -> Result<Vec<String>, CameraError> {
            Ok(query()?.iter().map(|d| d.human_name()).collect())
        }

        fn open(&self, request: &StreamRequest) -> Result<Box<dyn CameraStream>, CameraError> {
            let devices = query()?;
            let names: Vec<String> = devices.iter().map(|d| d.human_name()).collect();
            let chosen = pick_device(&names, request)
                .ok_or_else(|| CameraError::Access("no camera found".to_string()))?;
            info!("Opening camera: {}", names[chosen]);

            let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
            let mut camera = Camera::new(devices[chosen].index().clone(), format)
                .map_err(|e| CameraError::Access(e.to_string()))?;
            camera
                .open_stream()
                .map_err(|e| CameraError::Access(e.to_string()))?;

            Ok(Box::new(NativeStream { camera }))
        }
    }

    struct NativeStream {
        camera: Camera,
    }

    impl CameraStream for NativeStream {
        fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
            let buffer = self
                .camera
                .frame()
                .map_err(|e| CameraError::Frame(e.to_string()))?;
            let decoded = buffer
                .decode_image::<RgbFormat>()
                .map_err(|e| CameraError::Frame(e.to_string()))?;
            let (width, height) = (decoded.width(), decoded.height());
            RgbImage::from_raw(width, height, decoded.into_raw())
                .ok_or_else(|| CameraError::Frame("frame size does not match its buffer".to_string()))
        }

        fn stop(&mut self) {
            if let Err(e) = self.camera.stop_stream() {
                warn!("Failed to stop camera stream: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Shared view of what the fake camera was asked to do.
    #[derive(Default)]
    pub struct StreamCounts {
        pub opened: AtomicUsize,
        pub stopped: AtomicUsize,
    }

    impl StreamCounts {
        pub fn live_streams(&self) -> usize {
            self.opened.load(Ordering::SeqCst) - self.stopped.load(Ordering::SeqCst)
        }
    }

    pub struct FakeCamera {
        pub supported: bool,
        pub deny: bool,
        pub frame_size: (u32, u32),
        /// How long `open` blocks, like a permission prompt left unanswered.
        pub open_delay: Duration,
        pub counts: Arc<StreamCounts>,
    }

    impl FakeCamera {
        pub fn new(frame_size: (u32, u32)) -> Self {
            Self {
                supported: true,
                deny: false,
                frame_size,
                open_delay: Duration::ZERO,
                counts: Arc::new(StreamCounts::default()),
            }
        }
    }

    struct FakeStream {
        size: (u32, u32),
        counts: Arc<StreamCounts>,
    }

    impl CameraStream for FakeStream {
        fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
            thread::sleep(Duration::from_millis(2));
            Ok(RgbImage::from_pixel(self.size.0, self.size.1, image::Rgb([250, 120, 20])))
        }

        fn stop(&mut self) {
            self.counts.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CameraBackend for FakeCamera {
        fn is_supported(&self) -> bool {
            self.supported
        }

        fn list_devices(&self) -> Result<Vec<String>, CameraError> {
            Ok(vec!["Fake Rear Camera".to_string()])
        }

        fn open(&self, _request: &StreamRequest) -> Result<Box<dyn CameraStream>, CameraError> {
            thread::sleep(self.open_delay);
            if self.deny {
                return Err(CameraError::Access("permission denied".to_string()));
            }
            self.counts.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                size: self.frame_size,
                counts: Arc::clone(&self.counts),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeCamera;
    use super::*;
    use rstest::rstest;
    use std::sync::mpsc;
    use std::time::Duration;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(&["FaceTime HD", "USB Rear Camera"], Facing::Environment, None, Some(1))]
    #[case(&["Integrated Webcam"], Facing::Environment, None, Some(0))]
    #[case(&["Back", "Front"], Facing::User, None, Some(1))]
    #[case(&["A", "B"], Facing::Environment, Some(1), Some(1))]
    #[case(&["A"], Facing::Environment, Some(3), None)]
    #[case(&[], Facing::Environment, None, None)]
    fn picks_device(
        #[case] list: &[&str],
        #[case] facing: Facing,
        #[case] device: Option<usize>,
        #[case] expected: Option<usize>,
    ) {
        let request = StreamRequest { facing, device };
        assert_eq!(pick_device(&names(list), &request), expected);
    }

    #[test]
    fn session_reports_ready_and_releases_on_drop() {
        let camera = FakeCamera::new((4, 3));
        let counts = Arc::clone(&camera.counts);
        let (tx, rx) = mpsc::channel();
        let session = CameraSession::start(Arc::new(camera), StreamRequest::default(), move |e| {
            let _ = tx.send(e);
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), CameraEvent::Opened);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), CameraEvent::Ready);
        let (_, frame) = session.latest_frame().unwrap();
        assert_eq!(frame.dimensions(), (4, 3));

        drop(session);
        assert_eq!(counts.live_streams(), 0);
    }

    #[test]
    fn empty_frames_never_report_ready() {
        let camera = FakeCamera::new((0, 0));
        let (tx, rx) = mpsc::channel();
        let session = CameraSession::start(Arc::new(camera), StreamRequest::default(), move |e| {
            let _ = tx.send(e);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), CameraEvent::Opened);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        session.stop();
    }

    #[test]
    fn denied_access_reports_failure() {
        let mut camera = FakeCamera::new((4, 3));
        camera.deny = true;
        let (tx, rx) = mpsc::channel();
        let session = CameraSession::start(Arc::new(camera), StreamRequest::default(), move |e| {
            let _ = tx.send(e);
        });
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, CameraEvent::Failed(CameraError::Access(_))));
        session.stop();
    }

    #[test]
    fn release_returns_while_the_device_is_still_opening() {
        let mut camera = FakeCamera::new((4, 3));
        camera.open_delay = Duration::from_millis(400);
        let counts = Arc::clone(&camera.counts);
        let (tx, rx) = mpsc::channel();
        let session = CameraSession::start(Arc::new(camera), StreamRequest::default(), move |e| {
            let _ = tx.send(e);
        });

        let started = std::time::Instant::now();
        session.release();
        assert!(started.elapsed() < Duration::from_millis(200));

        // The late stream is stopped by the worker and never reported
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while counts.opened.load(std::sync::atomic::Ordering::SeqCst) == 0 || counts.live_streams() > 0 {
            assert!(std::time::Instant::now() < deadline, "stream was never released");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn unsupported_backend_refuses_everything() {
        let backend = UnsupportedCamera;
        assert!(!backend.is_supported());
        assert_eq!(backend.list_devices().unwrap_err(), CameraError::Unsupported);
        assert!(backend.open(&StreamRequest::default()).is_err());
    }
}
