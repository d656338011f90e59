use image::RgbaImage;
use tracing::{debug, info};

use crate::video::{Frame, FrameSequence};

/// Channel values are scaled down by this before differencing, so the
/// threshold stays in a small, resolution-independent range.
const INTENSITY_SCALE: f64 = 100.0;

/// Mean squared difference between two equally sized images.
///
/// Each channel is divided by 100 before differencing; the squared
/// differences of all channels are summed and divided by the pixel count.
pub fn mse(a: &RgbaImage, b: &RgbaImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let pixels = a.width() as u64 * a.height() as u64;
    if pixels == 0 {
        return Some(0.0);
    }

    let sum: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| {
            let d = (x as f64 - y as f64) / INTENSITY_SCALE;
            d * d
        })
        .sum();

    Some(sum / pixels as f64)
}

/// True when `candidate` is a visual repeat of `representative`.
fn is_duplicate(representative: &Frame, candidate: &Frame, mse_strength: f64) -> bool {
    mse(&representative.image, &candidate.image).is_some_and(|err| err < mse_strength)
}

/// Merge runs of near-identical consecutive frames.
///
/// The first frame of a run stays and absorbs the display time of every
/// frame merged into it. A run ends at the first frame that differs in
/// resolution or whose MSE against the run's first frame reaches
/// `mse_strength`. Timing is recomputed afterwards. Returns the number of
/// frames removed.
pub fn collapse_duplicates(seq: &mut FrameSequence, mse_strength: f64) -> usize {
    let before = seq.framecount();
    let frames = seq.replace_frames(Vec::new());

    let mut kept: Vec<Frame> = Vec::with_capacity(frames.len());
    let mut run_len = 0usize;

    for frame in frames {
        if let Some(representative) = kept
            .last_mut()
            .filter(|rep| is_duplicate(rep, &frame, mse_strength))
        {
            representative.duration += frame.duration;
            run_len += 1;
            continue;
        }

        if run_len > 0 {
            debug!(at = kept.len() - 1, merged = run_len, "collapsed duplicate run");
        }
        run_len = 0;
        kept.push(frame);
    }
    if run_len > 0 {
        debug!(at = kept.len() - 1, merged = run_len, "collapsed duplicate run");
    }

    seq.replace_frames(kept);
    let removed = before - seq.framecount();

    info!(
        before,
        after = seq.framecount(),
        removed,
        mse_strength,
        total_duration = %seq.total_duration(),
        "duplicate collapse complete"
    );
    removed
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::time::Rational;
    use crate::video::SequenceKind;

    fn solid(w: u32, h: u32, v: u8, ms: u64) -> Frame {
        Frame::new(
            RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255])),
            Rational::from_millis(ms),
        )
    }

    fn seq(frames: Vec<Frame>) -> FrameSequence {
        FrameSequence::new(SequenceKind::Animated, 8, 8, frames)
    }

    fn values(seq: &FrameSequence) -> Vec<u8> {
        seq.frames().iter().map(|f| f.image.get_pixel(0, 0)[0]).collect()
    }

    #[test]
    fn mse_of_identical_images_is_zero() {
        let a = RgbaImage::from_pixel(3, 3, Rgba([10, 20, 30, 255]));
        assert_eq!(mse(&a, &a), Some(0.0));
    }

    #[test]
    fn mse_scales_channel_difference() {
        let a = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let b = RgbaImage::from_pixel(2, 2, Rgba([10, 0, 0, 255]));
        // (10/100)^2 per pixel.
        let err = mse(&a, &b).unwrap();
        assert!((err - 0.01).abs() < 1e-12);
    }

    #[test]
    fn mse_requires_equal_resolution() {
        let a = RgbaImage::new(2, 2);
        let b = RgbaImage::new(2, 3);
        assert_eq!(mse(&a, &b), None);
    }

    #[test]
    fn identical_pair_merges_and_third_starts_new_run() {
        let mut s = seq(vec![solid(8, 8, 50, 40), solid(8, 8, 50, 60), solid(8, 8, 200, 40)]);
        let removed = collapse_duplicates(&mut s, 0.03);

        assert_eq!(removed, 1);
        assert_eq!(s.framecount(), 2);
        assert_eq!(values(&s), vec![50, 200]);
        assert_eq!(s.frames()[0].duration, Rational::from_millis(100));
        assert_eq!(s.frames()[1].duration, Rational::from_millis(40));
        assert_eq!(s.total_duration(), Rational::from_millis(140));
    }

    #[test]
    fn run_duration_is_exact_sum_of_members() {
        let mut s = seq(vec![
            solid(8, 8, 0, 33),
            solid(8, 8, 0, 34),
            solid(8, 8, 0, 33),
            solid(8, 8, 90, 20),
            solid(8, 8, 90, 20),
        ]);
        collapse_duplicates(&mut s, 0.03);

        assert_eq!(values(&s), vec![0, 90]);
        assert_eq!(s.frames()[0].duration, Rational::from_millis(100));
        assert_eq!(s.frames()[1].duration, Rational::from_millis(40));
        let expected_fps = Rational::from_int(2)
            .checked_div(Rational::from_millis(140))
            .unwrap();
        assert_eq!(s.avg_fps(), expected_fps);
    }

    #[test]
    fn comparison_is_against_run_representative() {
        // Each step is below the threshold from its neighbour, but drift from
        // the first frame eventually reaches it.
        // Per-pixel error for a grey step of d is 3 * (d/100)^2.
        let mut s = seq(vec![
            solid(8, 8, 0, 10),
            solid(8, 8, 8, 10),
            solid(8, 8, 16, 10),
            solid(8, 8, 24, 10),
        ]);
        collapse_duplicates(&mut s, 0.03);
        // 8 -> 0.0192 (dup), 16 -> 0.0768 (new run), 24 vs 16 -> 0.0192 (dup)
        assert_eq!(values(&s), vec![0, 16]);
        assert_eq!(s.frames()[0].duration, Rational::from_millis(20));
        assert_eq!(s.frames()[1].duration, Rational::from_millis(20));
    }

    #[test]
    fn never_merges_across_resolution_change() {
        let mut s = seq(vec![
            solid(8, 8, 10, 10),
            solid(8, 6, 10, 10),
            solid(8, 8, 10, 10),
            solid(8, 6, 10, 10),
        ]);
        let removed = collapse_duplicates(&mut s, 0.03);
        assert_eq!(removed, 0);
        assert_eq!(s.framecount(), 4);
    }

    #[test]
    fn collapsing_is_idempotent() {
        let mut s = seq(vec![
            solid(8, 8, 0, 10),
            solid(8, 8, 1, 10),
            solid(8, 8, 120, 10),
            solid(8, 8, 121, 10),
            solid(8, 8, 121, 10),
            solid(8, 8, 0, 10),
        ]);
        collapse_duplicates(&mut s, 0.03);
        let first: Vec<(u8, Rational)> = s
            .frames()
            .iter()
            .map(|f| (f.image.get_pixel(0, 0)[0], f.duration))
            .collect();

        assert_eq!(collapse_duplicates(&mut s, 0.03), 0);
        let second: Vec<(u8, Rational)> = s
            .frames()
            .iter()
            .map(|f| (f.image.get_pixel(0, 0)[0], f.duration))
            .collect();
        assert_eq!(first, second);
        assert_eq!(values(&s), vec![0, 120, 0]);
    }

    #[test]
    fn single_frame_survives_with_valid_fps() {
        let mut s = seq(vec![solid(8, 8, 5, 50), solid(8, 8, 5, 50)]);
        collapse_duplicates(&mut s, 0.03);
        assert_eq!(s.framecount(), 1);
        assert_eq!(s.avg_fps(), Rational::from_int(10));
    }
}
