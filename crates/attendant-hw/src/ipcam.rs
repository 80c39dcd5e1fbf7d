//! HTTP IP-camera source.
//!
//! A `multipart/x-mixed-replace` response is read as an MJPEG stream; any
//! other content type is treated as a snapshot endpoint and re-fetched for
//! every frame.

use crate::camera::CameraError;
use crate::frame::{self, Frame};
use crate::source::FrameSource;
use std::io::Read;
use std::time::Duration;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;

enum HttpStream {
    Mjpeg(MjpegReader),
    Snapshot,
}

pub struct IpCamera {
    url: String,
    agent: ureq::Agent,
    stream: HttpStream,
    sequence: u32,
}

impl IpCamera {
    /// Connect and detect whether the URL serves a stream or snapshots.
    pub fn connect(url: &str, read_timeout: Duration) -> Result<Self, CameraError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(read_timeout)
            .timeout_read(read_timeout)
            .build();

        let response = agent
            .get(url)
            .call()
            .map_err(|e| CameraError::DeviceNotFound(format!("{url}: {e}")))?;

        let content_type = response.header("Content-Type").unwrap_or("").to_ascii_lowercase();
        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegReader::new(response.into_reader()))
        } else {
            HttpStream::Snapshot
        };

        tracing::info!(
            url,
            content_type = %content_type,
            mjpeg = matches!(stream, HttpStream::Mjpeg(_)),
            "connected to IP camera"
        );

        Ok(Self {
            url: url.to_string(),
            agent,
            stream,
            sequence: 0,
        })
    }

    fn fetch_snapshot(&self) -> Result<Vec<u8>, CameraError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| CameraError::Disconnected(format!("{}: {e}", self.url)))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| CameraError::Disconnected(format!("read snapshot: {e}")))?;
        if bytes.is_empty() {
            return Err(CameraError::CaptureFailed("empty jpeg snapshot".into()));
        }
        Ok(bytes)
    }
}

impl FrameSource for IpCamera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let jpeg = match &mut self.stream {
            HttpStream::Mjpeg(reader) => reader.next_jpeg()?,
            HttpStream::Snapshot => self.fetch_snapshot()?,
        };
        let image = frame::decode_jpeg(&jpeg)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", self.url)))?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Frame::from_image(image, self.sequence))
    }

    fn describe(&self) -> String {
        let kind = match self.stream {
            HttpStream::Mjpeg(_) => "mjpeg",
            HttpStream::Snapshot => "snapshot",
        };
        format!("{} ({kind})", self.url)
    }
}

/// Splits a multipart MJPEG byte stream into JPEG images by SOI/EOI markers.
struct MjpegReader {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CameraError::Disconnected(format!("read mjpeg chunk: {e}")))?;
            if read == 0 {
                return Err(CameraError::Disconnected("mjpeg stream ended".into()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // A runaway part without EOI: keep only the tail so a marker split
            // across reads is still found.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
