use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use tokio::sync::mpsc;
use tracing::debug;

/// One frame finished its transform.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Zero-based index of the finished frame.
    pub index: usize,
    pub total: usize,
    /// PNG thumbnail of the transformed frame.
    pub preview: Option<Vec<u8>>,
}

/// Best-effort progress reporting over a bounded channel.
///
/// Sending never blocks: when the queue is full or the receiver is gone the
/// event is dropped.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    preview_px: u32,
}

impl ProgressSink {
    /// Create a sink and its receiving end. `capacity` is clamped to at least 1.
    pub fn channel(capacity: usize, preview_px: u32) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, preview_px }, rx)
    }

    /// Report that frame `index` of `total` is done.
    pub fn notify(&self, index: usize, total: usize, image: &RgbaImage) {
        if self.tx.is_closed() {
            debug!(index, total, "progress receiver gone, dropping event");
            return;
        }

        // Rendering a thumbnail that would be dropped anyway is wasted work.
        let preview = if self.preview_px > 0 && self.tx.capacity() > 0 {
            render_preview(image, self.preview_px)
        } else {
            None
        };

        match self.tx.try_send(ProgressEvent {
            index,
            total,
            preview,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(index, total, "progress queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(index, total, "progress receiver gone, dropping event");
            }
        }
    }
}

fn render_preview(image: &RgbaImage, max_side: u32) -> Option<Vec<u8>> {
    let (w, h) = image.dimensions();
    let scale = f64::from(max_side) / f64::from(w.max(h).max(1));
    let thumb = if scale < 1.0 {
        let tw = ((f64::from(w) * scale).round() as u32).max(1);
        let th = ((f64::from(h) * scale).round() as u32).max(1);
        image::imageops::thumbnail(image, tw, th)
    } else {
        image.clone()
    };

    let mut buf = Vec::new();
    match thumb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png) {
        Ok(()) => Some(buf),
        Err(e) => {
            debug!(error = %e, "failed to encode progress preview");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn delivers_events_with_previews() {
        let (sink, mut rx) = ProgressSink::channel(4, 16);
        let image = RgbaImage::from_pixel(64, 32, Rgba([1, 2, 3, 255]));
        sink.notify(0, 2, &image);

        let event = rx.try_recv().unwrap();
        assert_eq!((event.index, event.total), (0, 2));
        let preview = image::load_from_memory(&event.preview.unwrap()).unwrap();
        assert_eq!((preview.width(), preview.height()), (16, 8));
    }

    #[test]
    fn drops_when_full_without_blocking() {
        let (sink, mut rx) = ProgressSink::channel(1, 0);
        let image = RgbaImage::new(4, 4);
        sink.notify(0, 3, &image);
        sink.notify(1, 3, &image);
        sink.notify(2, 3, &image);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.index, 0);
        assert!(event.preview.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (sink, rx) = ProgressSink::channel(2, 8);
        drop(rx);
        sink.notify(0, 1, &RgbaImage::new(2, 2));
    }
}
