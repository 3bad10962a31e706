use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::ImageFormat;
use tempfile::NamedTempFile;

use crate::error::{CleanupWarning, OperationError};

/// Produces the frame that gets sent for inference.
pub trait FrameSource {
    /// Writes the current frame to `target` as a PNG file.
    fn write_frame(&self, target: &Path) -> anyhow::Result<()>;

    fn describe(&self) -> String;
}

/// An image already on disk; any format the `image` crate decodes.
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    path: PathBuf,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for ImageFileSource {
    fn write_frame(&self, target: &Path) -> anyhow::Result<()> {
        let frame = image::open(&self.path)
            .with_context(|| format!("failed decoding {}", self.path.display()))?;
        frame
            .save_with_format(target, ImageFormat::Png)
            .with_context(|| format!("failed to save {}", target.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Temporary PNG holding the captured frame for the lifetime of one operation.
///
/// Dropping it removes the file; [`CaptureFile::release`] does the same but
/// reports a failed removal instead of swallowing it.
#[derive(Debug)]
pub struct CaptureFile {
    file: NamedTempFile,
}

impl CaptureFile {
    pub fn create() -> Result<Self, OperationError> {
        let file = tempfile::Builder::new()
            .prefix("neural-render-")
            .suffix(".png")
            .tempfile()
            .map_err(|err| {
                OperationError::Capture(format!("failed creating temporary file: {err}"))
            })?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Fills the file from `source` and checks something was written.
    pub fn fill_from(&self, source: &dyn FrameSource) -> Result<(), OperationError> {
        source
            .write_frame(self.path())
            .map_err(|err| OperationError::Capture(format!("{err:#}")))?;
        match fs::metadata(self.path()) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(OperationError::Capture(format!(
                "image not found at {}",
                self.path().display()
            ))),
        }
    }

    pub fn release(self) -> Option<CleanupWarning> {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => None,
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(source) => Some(CleanupWarning { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use image::{Rgb, RgbImage};

    use super::{CaptureFile, FrameSource, ImageFileSource};
    use crate::error::OperationError;

    struct NoopSource;

    impl FrameSource for NoopSource {
        fn write_frame(&self, _target: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "noop".to_string()
        }
    }

    struct BrokenSource;

    impl FrameSource for BrokenSource {
        fn write_frame(&self, _target: &Path) -> anyhow::Result<()> {
            anyhow::bail!("render engine crashed")
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    #[test]
    fn image_file_source_reencodes_to_png() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source_path = temp.path().join("frame.jpg");
        RgbImage::from_pixel(8, 4, Rgb([200, 10, 10])).save(&source_path)?;

        let capture = CaptureFile::create()?;
        capture.fill_from(&ImageFileSource::new(&source_path))?;
        let bytes = std::fs::read(capture.path())?;
        assert_eq!(image::guess_format(&bytes)?, image::ImageFormat::Png);
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (8, 4));

        let path = capture.path().to_path_buf();
        assert!(capture.release().is_none());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn empty_capture_is_a_capture_error() -> anyhow::Result<()> {
        let capture = CaptureFile::create()?;
        let err = capture.fill_from(&NoopSource).unwrap_err();
        assert!(matches!(err, OperationError::Capture(ref msg) if msg.starts_with("image not found")));
        let path = capture.path().to_path_buf();
        assert!(capture.release().is_none());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn failing_source_reports_its_cause() -> anyhow::Result<()> {
        let capture = CaptureFile::create()?;
        let err = capture.fill_from(&BrokenSource).unwrap_err();
        assert_eq!(err.to_string(), "capture failed: render engine crashed");
        capture.release();
        Ok(())
    }

    #[test]
    fn missing_source_file_fails_capture() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let capture = CaptureFile::create()?;
        let source = ImageFileSource::new(temp.path().join("absent.png"));
        assert!(matches!(
            capture.fill_from(&source),
            Err(OperationError::Capture(_))
        ));
        capture.release();
        Ok(())
    }

    #[test]
    fn release_tolerates_an_already_removed_file() -> anyhow::Result<()> {
        let capture = CaptureFile::create()?;
        std::fs::remove_file(capture.path())?;
        assert!(capture.release().is_none());
        Ok(())
    }
}
