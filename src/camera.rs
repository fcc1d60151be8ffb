//! Selfie capture.
//!
//! [`SelfieCapture`] walks a [`CameraDevice`] through
//! `Idle → DeviceRequested → Previewing → Captured → Released`. The device is
//! held only while previewing: `capture()` releases it before returning.

use crate::error::{Error, Result};
use crate::selfie::ImageData;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use log::{debug, info, warn};
use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;

pub trait CameraDevice {
    /// Starts the video feed and reports its resolution.
    fn acquire(&mut self) -> Result<(u32, u32)>;

    fn grab_frame(&mut self) -> Result<RgbImage>;

    /// Stops every underlying track.
    fn release(&mut self);
}

impl<C: CameraDevice + ?Sized> CameraDevice for Box<C> {
    fn acquire(&mut self) -> Result<(u32, u32)> {
        (**self).acquire()
    }
    fn grab_frame(&mut self) -> Result<RgbImage> {
        (**self).grab_frame()
    }
    fn release(&mut self) {
        (**self).release()
    }
}

/// Generated test pattern; shifts every frame so consecutive captures differ.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame: u32,
    active: bool,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        SyntheticCamera {
            width,
            height,
            frame: 0,
            active: false,
        }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(64, 48)
    }
}

impl CameraDevice for SyntheticCamera {
    fn acquire(&mut self) -> Result<(u32, u32)> {
        self.active = true;
        Ok((self.width, self.height))
    }

    fn grab_frame(&mut self) -> Result<RgbImage> {
        if !self.active {
            return Err(Error::DeviceUnavailable("camera is not started".to_string()));
        }
        self.frame = self.frame.wrapping_add(1);
        let shift = self.frame;
        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y.wrapping_add(shift) % 256) as u8,
                ((x ^ y) % 256) as u8,
            ])
        }))
    }

    fn release(&mut self) {
        self.active = false;
    }
}

/// Serves a still image from disk as its only frame.
pub struct FileCamera {
    path: PathBuf,
    frame: Option<RgbImage>,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCamera {
            path: path.into(),
            frame: None,
        }
    }
}

impl CameraDevice for FileCamera {
    fn acquire(&mut self) -> Result<(u32, u32)> {
        let frame = image::open(&self.path)
            .map_err(|err| Error::DeviceUnavailable(format!("{:?}: {}", self.path, err)))?
            .to_rgb8();
        let dimensions = frame.dimensions();
        self.frame = Some(frame);
        Ok(dimensions)
    }

    fn grab_frame(&mut self) -> Result<RgbImage> {
        self.frame
            .clone()
            .ok_or_else(|| Error::DeviceUnavailable("camera is not started".to_string()))
    }

    fn release(&mut self) {
        self.frame = None;
    }
}

/// Always denies access.
pub struct NoCamera;

impl CameraDevice for NoCamera {
    fn acquire(&mut self) -> Result<(u32, u32)> {
        Err(Error::DeviceUnavailable("no camera device".to_string()))
    }

    fn grab_frame(&mut self) -> Result<RgbImage> {
        Err(Error::DeviceUnavailable("no camera device".to_string()))
    }

    fn release(&mut self) {}
}

/// `synthetic`, `none`, or a path to an image file.
pub fn camera_from_arg(arg: &str) -> Box<dyn CameraDevice> {
    match arg {
        "synthetic" => Box::new(SyntheticCamera::default()),
        "none" => Box::new(NoCamera),
        path => Box::new(FileCamera::new(path)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    DeviceRequested,
    Previewing,
    Captured,
    Released,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::DeviceRequested => "requesting the camera",
            CaptureState::Previewing => "previewing",
            CaptureState::Captured => "holding a capture",
            CaptureState::Released => "released",
        };
        write!(f, "{}", name)
    }
}

/// Live feed handed out while previewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewHandle {
    pub width: u32,
    pub height: u32,
    /// Which acquisition this feed belongs to, starting at 1.
    pub acquisition: u32,
}

pub struct SelfieCapture<C: CameraDevice> {
    camera: C,
    state: CaptureState,
    preview: Option<PreviewHandle>,
    still: Option<ImageData>,
    acquisitions: u32,
    releases: u32,
}

impl<C: CameraDevice> SelfieCapture<C> {
    pub fn new(camera: C) -> Self {
        SelfieCapture {
            camera,
            state: CaptureState::Idle,
            preview: None,
            still: None,
            acquisitions: 0,
            releases: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn still(&self) -> Option<&ImageData> {
        self.still.as_ref()
    }

    pub fn acquisitions(&self) -> u32 {
        self.acquisitions
    }

    pub fn releases(&self) -> u32 {
        self.releases
    }

    /// While already previewing, returns the current feed instead of
    /// acquiring the camera a second time.
    pub fn request_device(&mut self) -> Result<PreviewHandle> {
        match self.state {
            CaptureState::Previewing => {
                if let Some(preview) = self.preview {
                    debug!("[Camera] Already previewing, reusing feed {}", preview.acquisition);
                    return Ok(preview);
                }
            }
            CaptureState::Captured => {
                return Err(self.invalid("request_device"));
            }
            _ => {}
        }

        self.state = CaptureState::DeviceRequested;
        match self.camera.acquire() {
            Ok((width, height)) => {
                self.acquisitions += 1;
                let preview = PreviewHandle {
                    width,
                    height,
                    acquisition: self.acquisitions,
                };
                info!("[Camera] Previewing at {}x{}", width, height);
                self.preview = Some(preview);
                self.state = CaptureState::Previewing;
                Ok(preview)
            }
            Err(err) => {
                warn!("[Camera] Cannot access the camera: {}", err);
                self.state = CaptureState::Idle;
                Err(match err {
                    Error::DeviceUnavailable(reason) => Error::DeviceUnavailable(reason),
                    other => Error::DeviceUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Samples the current frame into a PNG still. The camera is released
    /// before this returns, whether or not the frame could be taken.
    pub fn capture(&mut self) -> Result<ImageData> {
        if self.state != CaptureState::Previewing {
            return Err(self.invalid("capture"));
        }
        let frame = self.camera.grab_frame();
        self.release_device();

        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                self.state = CaptureState::Idle;
                return Err(err);
            }
        };
        let image = match encode_png(frame) {
            Ok(image) => image,
            Err(err) => {
                self.state = CaptureState::Idle;
                return Err(err);
            }
        };
        debug!("[Camera] Captured {} byte data URL", image.as_data_url().len());
        self.still = Some(image.clone());
        self.state = CaptureState::Captured;
        Ok(image)
    }

    /// Discards the still and starts previewing again.
    pub fn retake(&mut self) -> Result<PreviewHandle> {
        if self.state != CaptureState::Captured {
            return Err(self.invalid("retake"));
        }
        self.still = None;
        self.state = CaptureState::Idle;
        self.request_device()
    }

    /// Abandons the capture flow, e.g. when the taker skips the selfie.
    pub fn release(&mut self) {
        if self.state == CaptureState::Previewing {
            self.release_device();
        }
        self.state = CaptureState::Released;
    }

    fn release_device(&mut self) {
        if self.preview.take().is_some() {
            self.camera.release();
            self.releases += 1;
            debug!("[Camera] Released camera ({} releases)", self.releases);
        }
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }
}

impl<C: CameraDevice> Drop for SelfieCapture<C> {
    fn drop(&mut self) {
        self.release_device();
    }
}

fn encode_png(frame: RgbImage) -> Result<ImageData> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(frame).write_to(&mut bytes, ImageFormat::Png)?;
    Ok(ImageData::from_png(&bytes.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counters {
        acquired: Cell<u32>,
        released: Cell<u32>,
        active: Cell<bool>,
    }

    struct CountingCamera(Rc<Counters>);

    impl CameraDevice for CountingCamera {
        fn acquire(&mut self) -> Result<(u32, u32)> {
            assert!(!self.0.active.get(), "camera acquired twice");
            self.0.acquired.set(self.0.acquired.get() + 1);
            self.0.active.set(true);
            Ok((4, 3))
        }

        fn grab_frame(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::from_pixel(4, 3, Rgb([200, 10, 10])))
        }

        fn release(&mut self) {
            assert!(self.0.active.get(), "camera released twice");
            self.0.released.set(self.0.released.get() + 1);
            self.0.active.set(false);
        }
    }

    fn counting() -> (SelfieCapture<CountingCamera>, Rc<Counters>) {
        let counters = Rc::new(Counters::default());
        (SelfieCapture::new(CountingCamera(Rc::clone(&counters))), counters)
    }

    #[test]
    fn capture_releases_the_camera_immediately() {
        let (mut capture, counters) = counting();
        capture.request_device().unwrap();
        assert_eq!(capture.state(), CaptureState::Previewing);

        let image = capture.capture().unwrap();
        assert_eq!(capture.state(), CaptureState::Captured);
        assert!(!counters.active.get());
        assert_eq!(counters.released.get(), 1);
        assert!(image.png_bytes().unwrap().starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn retake_cycle_acquires_and_releases_twice() {
        let (mut capture, counters) = counting();
        capture.request_device().unwrap();
        capture.capture().unwrap();
        let preview = capture.retake().unwrap();
        assert_eq!(preview.acquisition, 2);
        assert!(capture.still().is_none());
        capture.capture().unwrap();

        assert_eq!(counters.acquired.get(), 2);
        assert_eq!(counters.released.get(), 2);
        assert_eq!((capture.acquisitions(), capture.releases()), (2, 2));
    }

    #[test]
    fn requesting_while_previewing_reuses_the_feed() {
        let (mut capture, counters) = counting();
        let first = capture.request_device().unwrap();
        let second = capture.request_device().unwrap();
        assert_eq!(first, second);
        assert_eq!(counters.acquired.get(), 1);
    }

    #[test]
    fn capture_outside_preview_is_rejected() {
        let (mut capture, _) = counting();
        assert!(matches!(capture.capture(), Err(Error::InvalidTransition { .. })));
        assert!(matches!(capture.retake(), Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn dropping_while_previewing_releases_once() {
        let (mut capture, counters) = counting();
        capture.request_device().unwrap();
        drop(capture);
        assert_eq!(counters.released.get(), 1);
    }

    #[test]
    fn explicit_release_after_capture_does_not_release_again() {
        let (mut capture, counters) = counting();
        capture.request_device().unwrap();
        capture.capture().unwrap();
        capture.release();
        drop(capture);
        assert_eq!(counters.released.get(), 1);
    }

    struct EmptyFrameCamera;

    impl CameraDevice for EmptyFrameCamera {
        fn acquire(&mut self) -> Result<(u32, u32)> {
            Ok((0, 0))
        }
        fn grab_frame(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::new(0, 0))
        }
        fn release(&mut self) {}
    }

    #[test]
    fn unencodable_frame_leaves_capture_idle() {
        let mut capture = SelfieCapture::new(EmptyFrameCamera);
        capture.request_device().unwrap();
        assert!(capture.capture().is_err());
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(capture.releases(), 1);
        assert!(capture.still().is_none());

        capture.request_device().unwrap();
        assert_eq!(capture.acquisitions(), 2);
    }

    #[test]
    fn denied_camera_reports_device_unavailable() {
        let mut capture = SelfieCapture::new(NoCamera);
        assert!(matches!(capture.request_device(), Err(Error::DeviceUnavailable(_))));
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(capture.acquisitions(), 0);
    }

    #[test]
    fn missing_image_file_is_device_unavailable() {
        let mut capture = SelfieCapture::new(camera_from_arg("/definitely/not/here.png"));
        assert!(matches!(capture.request_device(), Err(Error::DeviceUnavailable(_))));
    }

    #[test]
    fn file_camera_serves_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(5, 7, Rgb([1, 2, 3])).save(&path).unwrap();

        let mut capture = SelfieCapture::new(FileCamera::new(&path));
        let preview = capture.request_device().unwrap();
        assert_eq!((preview.width, preview.height), (5, 7));
        let bytes = capture.capture().unwrap().png_bytes().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn synthetic_frames_differ_between_captures() {
        let mut capture = SelfieCapture::new(SyntheticCamera::new(8, 8));
        capture.request_device().unwrap();
        let first = capture.capture().unwrap();
        capture.retake().unwrap();
        let second = capture.capture().unwrap();
        assert_ne!(first, second);
    }
}
