//! Overlay renderers. Rendering never feeds back into decisions.

use attendant_core::{BoundingBox, Overlay};
use attendant_hw::Frame;
use image::{ImageFormat, Rgb, RgbImage};
use std::path::PathBuf;
use thiserror::Error;

const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("frame buffer does not match {0}x{1} RGB")]
    InvalidFrame(u32, u32),
    #[error("encode snapshot: {0}")]
    Image(#[from] image::ImageError),
    #[error("write snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives the current overlays after each processed frame.
pub trait OverlaySink: Send {
    fn render(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), SinkError>;
}

/// Logs overlay changes at debug level.
#[derive(Default)]
pub struct LogSink {
    last: Vec<String>,
}

impl OverlaySink for LogSink {
    fn render(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), SinkError> {
        let labels: Vec<String> = overlays
            .iter()
            .map(|o| match &o.detail {
                Some(detail) => format!("{} [{}] {detail}", o.label(), o.state),
                None => format!("{} [{}]", o.label(), o.state),
            })
            .collect();
        if labels != self.last {
            tracing::debug!(sequence = frame.sequence, overlays = ?labels, "overlays updated");
            self.last = labels;
        }
        Ok(())
    }
}

/// Writes the annotated frame as a JPEG, replacing the file atomically.
pub struct SnapshotSink {
    path: PathBuf,
}

impl SnapshotSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OverlaySink for SnapshotSink {
    fn render(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), SinkError> {
        let mut image = frame
            .to_image()
            .ok_or(SinkError::InvalidFrame(frame.width, frame.height))?;
        annotate(&mut image, overlays);

        let tmp = self.path.with_extension("jpg.tmp");
        image.save_with_format(&tmp, ImageFormat::Jpeg)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Both sinks in sequence.
pub struct TeeSink<A, B>(pub A, pub B);

impl<A: OverlaySink, B: OverlaySink> OverlaySink for TeeSink<A, B> {
    fn render(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), SinkError> {
        self.0.render(frame, overlays)?;
        self.1.render(frame, overlays)
    }
}

/// Draw each overlay's box in its state colour.
pub fn annotate(image: &mut RgbImage, overlays: &[Overlay]) {
    for overlay in overlays {
        draw_box(image, &overlay.region, Rgb(overlay.state.color()));
    }
}

fn draw_box(image: &mut RgbImage, region: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let (x0, y0) = (clamp_x(region.x), clamp_y(region.y));
    let (x1, y1) = (
        clamp_x(region.x + region.width),
        clamp_y(region.y + region.height),
    );

    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            image.put_pixel(x, (y0 + t).min(y1), color);
            image.put_pixel(x, y1.saturating_sub(t).max(y0), color);
        }
        for y in y0..=y1 {
            image.put_pixel((x0 + t).min(x1), y, color);
            image.put_pixel(x1.saturating_sub(t).max(x0), y, color);
        }
    }
}
