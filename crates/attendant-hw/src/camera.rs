//! V4L2 webcam capture via the `v4l` crate.
//!
//! The device is moved onto a dedicated capture thread that keeps one mmap
//! stream open for the session and hands RGB frames over a small bounded
//! channel. A slow consumer back-pressures the thread; the driver drops
//! frames meanwhile.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const CHANNEL_DEPTH: usize = 2;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera disconnected: {0}")]
    Disconnected(String),
    #[error("unsupported camera source: {0}")]
    UnsupportedSource(String),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer (most USB webcams above 640x480).
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"GREY" => Some(PixelFormat::Grey),
            _ => None,
        }
    }
}

/// V4L2 camera streaming RGB frames from a background thread.
pub struct Camera {
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
    frames: Receiver<Result<Frame, CameraError>>,
}

impl Camera {
    /// Open a V4L2 device (e.g., "/dev/video0"), negotiate a format close to
    /// `width` x `height`, and start streaming.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        // Ask for YUYV; drivers that only stream MJPG at this size answer with MJPG.
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let (w, h) = (negotiated.width, negotiated.height);
        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let path = device_path.to_string();

        std::thread::Builder::new()
            .name("attendant-capture".into())
            .spawn(move || {
                let mut stream =
                    match MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS) {
                        Ok(s) => s,
                        Err(e) => {
                            let _ = tx.send(Err(CameraError::CaptureFailed(format!(
                                "failed to create mmap stream: {e}"
                            ))));
                            return;
                        }
                    };
                tracing::debug!(device = %path, "capture thread started");

                loop {
                    let frame = match stream.next() {
                        Ok((buf, meta)) => to_rgb(buf, pixel_format, w, h)
                            .map(|rgb| Frame::new(rgb, w, h, meta.sequence)),
                        Err(e) => Err(CameraError::Disconnected(format!(
                            "failed to dequeue buffer: {e}"
                        ))),
                    };
                    let fatal = matches!(frame, Err(CameraError::Disconnected(_)));
                    if tx.send(frame).is_err() || fatal {
                        break;
                    }
                }
                tracing::debug!(device = %path, "capture thread exiting");
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        Ok(Self {
            width: w,
            height: h,
            device_path: device_path.to_string(),
            pixel_format,
            frames: rx,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.frames.recv().map_err(|_| {
            CameraError::Disconnected(format!("{}: capture thread exited", self.device_path))
        })?
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{} {:?})",
            self.device_path, self.width, self.height, self.pixel_format
        )
    }
}

/// Convert a raw buffer to RGB based on the negotiated format.
fn to_rgb(buf: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("GREY conversion failed: {e}"))),
        PixelFormat::Mjpeg => {
            let image = frame::decode_jpeg(buf)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPG frame: {e}")))?;
            if image.dimensions() != (width, height) {
                return Err(CameraError::CaptureFailed(format!(
                    "MJPG frame is {:?}, negotiated {width}x{height}",
                    image.dimensions()
                )));
            }
            Ok(image.into_raw())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/attendant-no-such-video", 640, 480).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_to_rgb_short_buffer_is_capture_error() {
        let err = to_rgb(&[0u8; 4], PixelFormat::Yuyv, 4, 4).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(_)));
    }
}
