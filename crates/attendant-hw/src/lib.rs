//! attendant-hw: Frame acquisition for the monitoring loop.
//!
//! Provides a V4L2 webcam source (YUYV / MJPG / GREY) and an HTTP IP-camera
//! source (multipart MJPEG or JPEG snapshots), both behind [`FrameSource`].

pub mod camera;
pub mod frame;
pub mod ipcam;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use ipcam::IpCamera;
pub use source::{open_source, FrameSource, SourceSpec};
