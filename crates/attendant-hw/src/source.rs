use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use crate::ipcam::IpCamera;
use std::time::Duration;

/// A blocking sequence of frames. An error from `next_frame` is treated as
/// permanent by the monitoring loop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Where frames come from, parsed from a configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// V4L2 device path; a bare index `N` means `/dev/videoN`.
    Device(String),
    /// HTTP(S) IP camera: multipart MJPEG stream or JPEG snapshot URL.
    Http(String),
}

impl SourceSpec {
    pub fn parse(s: &str) -> Result<Self, CameraError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CameraError::UnsupportedSource("empty camera source".into()));
        }
        if let Ok(index) = s.parse::<u32>() {
            return Ok(SourceSpec::Device(format!("/dev/video{index}")));
        }
        if s.starts_with('/') {
            return Ok(SourceSpec::Device(s.to_string()));
        }
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(SourceSpec::Http(s.to_string()));
        }
        Err(CameraError::UnsupportedSource(format!(
            "'{s}' (expected a device index, /dev/videoN path, or http(s) URL)"
        )))
    }
}

/// Open the configured source. Fails fast if the device or stream is unavailable.
pub fn open_source(
    spec: &SourceSpec,
    width: u32,
    height: u32,
    read_timeout: Duration,
) -> Result<Box<dyn FrameSource>, CameraError> {
    match spec {
        SourceSpec::Device(path) => Ok(Box::new(Camera::open(path, width, height)?)),
        SourceSpec::Http(url) => Ok(Box::new(IpCamera::connect(url, read_timeout)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        assert_eq!(SourceSpec::parse("0").unwrap(), SourceSpec::Device("/dev/video0".into()));
        assert_eq!(SourceSpec::parse(" 2 ").unwrap(), SourceSpec::Device("/dev/video2".into()));
    }

    #[test]
    fn test_parse_path_and_url() {
        assert_eq!(
            SourceSpec::parse("/dev/video4").unwrap(),
            SourceSpec::Device("/dev/video4".into())
        );
        assert_eq!(
            SourceSpec::parse("http://10.0.0.5:8080/video").unwrap(),
            SourceSpec::Http("http://10.0.0.5:8080/video".into())
        );
    }

    #[test]
    fn test_parse_rejects_rtsp_and_empty() {
        assert!(matches!(
            SourceSpec::parse("rtsp://cam/stream"),
            Err(CameraError::UnsupportedSource(_))
        ));
        assert!(SourceSpec::parse("  ").is_err());
    }
}
