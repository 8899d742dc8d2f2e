use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use freshcheck_contracts::capture::{
    is_image_content_type, CapturedImage, DisplayUriRegistry, MediaError, CAMERA_JPEG_QUALITY,
    MAX_MEDIA_BYTES,
};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Rear camera, the one pointed at the produce.
    Environment,
    User,
}

/// Platform camera capability.
pub trait CameraDevice: Send {
    /// Opens a live stream. Implementations map a declined prompt to
    /// `MediaError::PermissionDenied`.
    fn open(&mut self, facing: Facing) -> Result<Box<dyn CameraStream>, MediaError>;
}

pub trait CameraStream: Send {
    fn frame(&mut self) -> Result<RgbImage>;
    /// Stops every track. Must be idempotent.
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// A file chosen by the user, with the content type the picker declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self {
            name,
            content_type: mime_for_path(path).map(str::to_string),
            bytes,
        })
    }
}

/// Owns the current capture slot and the (at most one) live camera stream.
pub struct MediaAcquirer {
    camera: Option<Box<dyn CameraDevice>>,
    stream: Option<Box<dyn CameraStream>>,
    current: Option<CapturedImage>,
    uris: DisplayUriRegistry,
}

impl MediaAcquirer {
    pub fn new(camera: Option<Box<dyn CameraDevice>>) -> Self {
        Self::with_registry(camera, DisplayUriRegistry::new())
    }

    pub fn with_registry(camera: Option<Box<dyn CameraDevice>>, uris: DisplayUriRegistry) -> Self {
        Self {
            camera,
            stream: None,
            current: None,
            uris,
        }
    }

    pub fn uris(&self) -> &DisplayUriRegistry {
        &self.uris
    }

    pub fn current(&self) -> Option<&CapturedImage> {
        self.current.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
            .as_ref()
            .map(|stream| stream.is_active())
            .unwrap_or(false)
    }

    pub fn start_camera(&mut self) -> Result<(), MediaError> {
        self.release_stream();
        let Some(camera) = self.camera.as_mut() else {
            return Err(MediaError::DeviceUnavailable);
        };
        self.stream = Some(camera.open(Facing::Environment)?);
        Ok(())
    }

    /// Current frame of the live stream, for preview.
    pub fn preview_frame(&mut self) -> Result<RgbImage, MediaError> {
        let stream = self.stream.as_mut().ok_or(MediaError::StreamNotStarted)?;
        stream
            .frame()
            .map_err(|err| MediaError::FrameCapture(format!("{err:#}")))
    }

    /// Shutter: snapshot the live frame as JPEG, then release the stream
    /// whether or not the snapshot worked.
    pub fn capture_still(&mut self) -> Result<CapturedImage, MediaError> {
        let snapshot = self.preview_frame().and_then(encode_jpeg);
        self.release_stream();
        let bytes = snapshot?;
        let name = format!("capture-{}.jpg", chrono::Utc::now().timestamp_millis());
        Ok(self.install(bytes, "image/jpeg", name))
    }

    pub fn cancel_camera(&mut self) {
        self.release_stream();
    }

    pub fn acquire_from_camera(&mut self) -> Result<CapturedImage, MediaError> {
        self.start_camera()?;
        self.capture_still()
    }

    /// Rejected input leaves the current capture untouched.
    pub fn acquire_from_file(&mut self, file: SelectedFile) -> Result<CapturedImage, MediaError> {
        let content_type = file
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| mime_for_path(Path::new(&file.name)).map(str::to_string))
            .ok_or(MediaError::InvalidMediaType)?;
        if !is_image_content_type(&content_type) {
            return Err(MediaError::InvalidMediaType);
        }
        if file.bytes.len() >= MAX_MEDIA_BYTES {
            return Err(MediaError::MediaTooLarge);
        }
        if file.bytes.is_empty() {
            return Err(MediaError::EmptyMedia);
        }
        Ok(self.install(file.bytes, content_type, file.name))
    }

    pub fn reset(&mut self) {
        if let Some(previous) = self.current.take() {
            self.uris.revoke(previous.display_uri());
        }
    }

    fn install(
        &mut self,
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> CapturedImage {
        self.reset();
        let image = CapturedImage::new(bytes, mime_type, file_name, self.uris.mint());
        self.current = Some(image.clone());
        image
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl Drop for MediaAcquirer {
    fn drop(&mut self) {
        self.release_stream();
    }
}

fn encode_jpeg(frame: RgbImage) -> Result<Vec<u8>, MediaError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, CAMERA_JPEG_QUALITY);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(frame))
        .map_err(|err| MediaError::FrameCapture(err.to_string()))?;
    Ok(bytes)
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "bmp" => Some("image/bmp"),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

/// Camera backed by a still image on disk, for headless hosts and demos.
pub struct StillFrameCamera {
    source: PathBuf,
}

impl StillFrameCamera {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl CameraDevice for StillFrameCamera {
    fn open(&mut self, _facing: Facing) -> Result<Box<dyn CameraStream>, MediaError> {
        if !self.source.is_file() {
            return Err(MediaError::DeviceUnavailable);
        }
        Ok(Box::new(StillFrameStream {
            source: self.source.clone(),
            active: true,
        }))
    }
}

struct StillFrameStream {
    source: PathBuf,
    active: bool,
}

impl CameraStream for StillFrameStream {
    fn frame(&mut self) -> Result<RgbImage> {
        anyhow::ensure!(self.active, "stream stopped");
        let decoded = image::open(&self.source)
            .with_context(|| format!("failed decoding {}", self.source.display()))?;
        Ok(decoded.to_rgb8())
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use image::Rgb;

    use super::*;

    struct FakeCamera {
        deny: bool,
        open_streams: Arc<AtomicUsize>,
    }

    struct FakeStream {
        open_streams: Arc<AtomicUsize>,
        active: bool,
        broken: bool,
    }

    impl CameraDevice for FakeCamera {
        fn open(&mut self, facing: Facing) -> Result<Box<dyn CameraStream>, MediaError> {
            assert_eq!(facing, Facing::Environment);
            if self.deny {
                return Err(MediaError::PermissionDenied);
            }
            self.open_streams.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                open_streams: Arc::clone(&self.open_streams),
                active: true,
                broken: false,
            }))
        }
    }

    impl CameraStream for FakeStream {
        fn frame(&mut self) -> Result<RgbImage> {
            anyhow::ensure!(!self.broken, "sensor glitch");
            Ok(RgbImage::from_pixel(8, 6, Rgb([200, 40, 40])))
        }

        fn stop(&mut self) {
            if self.active {
                self.active = false;
                self.open_streams.fetch_sub(1, Ordering::SeqCst);
            }
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    fn fake_camera(deny: bool) -> (Box<dyn CameraDevice>, Arc<AtomicUsize>) {
        let open_streams = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FakeCamera {
                deny,
                open_streams: Arc::clone(&open_streams),
            }),
            open_streams,
        )
    }

    fn png_file(name: &str, len: usize) -> SelectedFile {
        SelectedFile {
            name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: vec![7; len],
        }
    }

    #[test]
    fn file_acquisition_keeps_bytes_and_mints_uri() -> anyhow::Result<()> {
        let mut acquirer = MediaAcquirer::new(None);
        for len in [1, 4096, MAX_MEDIA_BYTES - 1] {
            let image = acquirer.acquire_from_file(png_file("kiwi.png", len))?;
            assert_eq!(image.len(), len);
            assert!(!image.display_uri().is_empty());
            assert_eq!(image.mime_type(), "image/png");
            assert_eq!(image.file_name(), "kiwi.png");
        }
        assert_eq!(acquirer.uris().live_count(), 1);
        Ok(())
    }

    #[test]
    fn non_image_content_type_is_rejected() {
        let mut acquirer = MediaAcquirer::new(None);
        for content_type in ["application/pdf", "text/plain", "video/mp4"] {
            let file = SelectedFile {
                name: "notes.bin".to_string(),
                content_type: Some(content_type.to_string()),
                bytes: vec![1, 2, 3],
            };
            assert_eq!(
                acquirer.acquire_from_file(file),
                Err(MediaError::InvalidMediaType)
            );
        }
        assert!(acquirer.current().is_none());
        assert_eq!(acquirer.uris().live_count(), 0);
    }

    #[test]
    fn missing_content_type_falls_back_to_extension() -> anyhow::Result<()> {
        let mut acquirer = MediaAcquirer::new(None);
        let mut file = png_file("peach.JPG", 10);
        file.content_type = None;
        assert_eq!(acquirer.acquire_from_file(file)?.mime_type(), "image/jpeg");

        let mut unknown = png_file("blob", 10);
        unknown.content_type = None;
        assert_eq!(
            acquirer.acquire_from_file(unknown),
            Err(MediaError::InvalidMediaType)
        );
        Ok(())
    }

    #[test]
    fn files_at_or_above_limit_are_too_large() {
        let mut acquirer = MediaAcquirer::new(None);
        for len in [MAX_MEDIA_BYTES, MAX_MEDIA_BYTES + 1] {
            assert_eq!(
                acquirer.acquire_from_file(png_file("big.png", len)),
                Err(MediaError::MediaTooLarge)
            );
        }
        assert_eq!(
            acquirer.acquire_from_file(png_file("empty.png", 0)),
            Err(MediaError::EmptyMedia)
        );
    }

    #[test]
    fn new_acquisition_revokes_previous_uri() -> anyhow::Result<()> {
        let mut acquirer = MediaAcquirer::new(None);
        let first = acquirer.acquire_from_file(png_file("a.png", 3))?;
        let second = acquirer.acquire_from_file(png_file("b.png", 3))?;

        assert!(!acquirer.uris().is_live(first.display_uri()));
        assert!(acquirer.uris().is_live(second.display_uri()));
        assert_eq!(acquirer.uris().live_count(), 1);

        assert!(acquirer
            .acquire_from_file(png_file("c.txt", 3).with_type("text/plain"))
            .is_err());
        assert!(acquirer.uris().is_live(second.display_uri()));

        acquirer.reset();
        assert!(acquirer.current().is_none());
        assert_eq!(acquirer.uris().live_count(), 0);
        Ok(())
    }

    #[test]
    fn camera_capture_encodes_jpeg_and_releases_stream() -> anyhow::Result<()> {
        let (camera, open_streams) = fake_camera(false);
        let mut acquirer = MediaAcquirer::new(Some(camera));

        acquirer.start_camera()?;
        assert!(acquirer.is_streaming());
        assert_eq!(acquirer.preview_frame()?.dimensions(), (8, 6));

        let image = acquirer.capture_still()?;
        assert_eq!(image.mime_type(), "image/jpeg");
        assert!(image.file_name().starts_with("capture-"));
        assert_eq!(&image.bytes()[..2], &[0xFF, 0xD8]);
        assert!(!acquirer.is_streaming());
        assert_eq!(open_streams.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn camera_paths_report_typed_errors() {
        let mut no_camera = MediaAcquirer::new(None);
        assert_eq!(
            no_camera.acquire_from_camera(),
            Err(MediaError::DeviceUnavailable)
        );

        let (camera, _) = fake_camera(true);
        let mut denied = MediaAcquirer::new(Some(camera));
        assert_eq!(denied.start_camera(), Err(MediaError::PermissionDenied));
        assert_eq!(denied.capture_still(), Err(MediaError::StreamNotStarted));
    }

    #[test]
    fn only_one_stream_is_live_and_teardown_releases_it() -> anyhow::Result<()> {
        let (camera, open_streams) = fake_camera(false);
        let mut acquirer = MediaAcquirer::new(Some(camera));
        acquirer.start_camera()?;
        acquirer.start_camera()?;
        assert_eq!(open_streams.load(Ordering::SeqCst), 1);

        acquirer.cancel_camera();
        assert_eq!(open_streams.load(Ordering::SeqCst), 0);

        acquirer.start_camera()?;
        drop(acquirer);
        assert_eq!(open_streams.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn failed_snapshot_still_releases_stream() -> anyhow::Result<()> {
        let open_streams = Arc::new(AtomicUsize::new(1));
        let mut acquirer = MediaAcquirer::new(None);
        acquirer.stream = Some(Box::new(FakeStream {
            open_streams: Arc::clone(&open_streams),
            active: true,
            broken: true,
        }));

        assert!(matches!(
            acquirer.capture_still(),
            Err(MediaError::FrameCapture(_))
        ));
        assert_eq!(open_streams.load(Ordering::SeqCst), 0);
        assert!(acquirer.current().is_none());
        Ok(())
    }

    #[test]
    fn still_frame_camera_reads_frame_from_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("frame.png");
        RgbImage::from_pixel(4, 4, Rgb([10, 200, 10])).save(&path)?;

        let mut acquirer = MediaAcquirer::new(Some(Box::new(StillFrameCamera::new(&path))));
        let image = acquirer.acquire_from_camera()?;
        assert_eq!(image.mime_type(), "image/jpeg");

        let mut missing =
            MediaAcquirer::new(Some(Box::new(StillFrameCamera::new(temp.path().join("none.png")))));
        assert_eq!(missing.start_camera(), Err(MediaError::DeviceUnavailable));
        Ok(())
    }

    impl SelectedFile {
        fn with_type(mut self, content_type: &str) -> Self {
            self.content_type = Some(content_type.to_string());
            self
        }
    }
}
