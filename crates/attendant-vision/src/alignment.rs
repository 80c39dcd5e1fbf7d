//! Face alignment to the ArcFace 112×112 template.
//!
//! Fits a 4-DOF similarity (scale, rotation, translation) from the five
//! detected landmarks to the InsightFace reference points in closed form,
//! then warps the RGB frame with bilinear sampling.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares fit from `src` to `dst` over centred point sets.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts
                .iter()
                .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / 5.0, sy / 5.0)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }

        if norm < 1e-12 {
            return Self::IDENTITY;
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map a destination point back into source coordinates.
    fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Warp `frame` through `transform` into an `out_size`² RGB image.
/// Samples outside the frame read as black.
pub fn warp(frame: &RgbImage, transform: &Similarity, out_size: u32) -> RgbImage {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = frame.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let Some((sx, sy)) = transform.invert((ox as f32, oy as f32)) else {
            return Rgb([0, 0, 0]);
        };
        let (x0, y0) = (sx.floor() as i64, sy.floor() as i64);
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        let mut out = [0u8; 3];
        for c in 0..3 {
            let top = tl[c] * (1.0 - fx) + tr[c] * fx;
            let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
            out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Align a detected face to a canonical 112×112 crop for ArcFace.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    warp(frame, &transform, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_estimate() {
        let pts = REFERENCE_LANDMARKS_112;
        let t = Similarity::estimate(&pts, &pts);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_scaled_and_shifted_estimate() {
        // Source landmarks at 2x scale plus a (30, 10) offset.
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0 + 30.0, y * 2.0 + 10.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4);
        for (s, d) in src.iter().zip(REFERENCE_LANDMARKS_112.iter()) {
            let (x, y) = t.apply(*s);
            assert!((x - d.0).abs() < 1e-2 && (y - d.1).abs() < 1e-2);
        }
    }

    #[test]
    fn test_rotation_recovered() {
        // 90° rotation: (x, y) -> (-y, x)
        let src = REFERENCE_LANDMARKS_112;
        let dst = src.map(|(x, y)| (-y, x));
        let t = Similarity::estimate(&src, &dst);
        assert!(t.a.abs() < 1e-4);
        assert!((t.b - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_landmarks_fall_back_to_identity() {
        let src = [(5.0, 5.0); 5];
        assert_eq!(Similarity::estimate(&src, &REFERENCE_LANDMARKS_112), Similarity::IDENTITY);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&frame, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(aligned.get_pixel(56, 56).0, [128, 128, 128]);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let mut frame = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // Bright red patch at the left eye.
        for y in 58..=62 {
            for x in 78..=82 {
                frame.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&frame, &src);
        let (rx, ry) = (
            REFERENCE_LANDMARKS_112[0].0.round() as u32,
            REFERENCE_LANDMARKS_112[0].1.round() as u32,
        );
        let max_red = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y).0[0])
            .max()
            .unwrap();
        assert!(max_red > 100, "left eye patch not near ({rx}, {ry}), max red = {max_red}");
        assert_eq!(aligned.get_pixel(rx, ry).0[1], 0);
    }
}
