//! Owned-frame delivery over a bounded channel, for consumers that would
//! rather pull frames than run inside the event thread.
//!
//! Frames are copied into a fixed pool of pre-allocated buffers. When the
//! pool is empty or the channel is full the frame is dropped and counted;
//! the event thread never blocks and never allocates.

use crate::stream::{alloc_zeroed, FrameCallback};
use crate::types::{Frame, PixelFormat};
use crate::{Result, Tc001Error};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A frame copied out of the event thread. Its buffer returns to the pool
/// when dropped.
pub struct OwnedFrame {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub timestamp_ns: u64,
    pub sequence: u32,
    len: usize,
    buffer: Option<Box<[u8]>>,
    pool: Sender<Box<[u8]>>,
}

impl OwnedFrame {
    pub fn data(&self) -> &[u8] {
        match &self.buffer {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }

    /// Borrow as a [`Frame`] view.
    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
            data: self.data(),
        }
    }
}

impl Drop for OwnedFrame {
    fn drop(&mut self) {
        if let Some(buf) = self.buffer.take() {
            // Pool gone means the stream is over; the buffer is simply freed.
            let _ = self.pool.try_send(buf);
        }
    }
}

impl std::fmt::Debug for OwnedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .finish()
    }
}

/// Receiving end of a frame stream.
pub struct FrameStream {
    receiver: Receiver<OwnedFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameStream {
    /// Receive the next frame (blocks until available).
    pub fn recv(&self) -> Result<OwnedFrame> {
        self.receiver.recv().map_err(|_| Tc001Error::StreamStopped)
    }

    /// Try to receive a frame without blocking.
    pub fn try_recv(&self) -> Option<OwnedFrame> {
        self.receiver.try_recv().ok()
    }

    /// Receive a frame with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<OwnedFrame> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => Tc001Error::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => Tc001Error::StreamStopped,
        })
    }

    /// Frames dropped because no buffer was free or the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Build the frame callback and the stream it feeds, with `capacity`
/// buffers of `frame_bytes` each.
pub(crate) fn frame_channel(capacity: usize, frame_bytes: usize) -> Result<(FrameCallback, FrameStream)> {
    if capacity == 0 {
        return Err(Tc001Error::InvalidParam("stream capacity must be non-zero"));
    }

    let (pool_tx, pool_rx) = crossbeam_channel::bounded::<Box<[u8]>>(capacity);
    for _ in 0..capacity {
        let buf = alloc_zeroed(frame_bytes, "stream frame buffer")?;
        // Cannot fail: the pool holds exactly `capacity` entries.
        let _ = pool_tx.try_send(buf);
    }

    let (sender, receiver) = crossbeam_channel::bounded::<OwnedFrame>(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&dropped);

    let callback: FrameCallback = Box::new(move |frame: &Frame<'_>| {
        let mut buf = match pool_rx.try_recv() {
            Ok(buf) if buf.len() >= frame.data.len() => buf,
            _ => {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        buf[..frame.data.len()].copy_from_slice(frame.data);

        let owned = OwnedFrame {
            width: frame.width,
            height: frame.height,
            stride: frame.stride,
            format: frame.format,
            timestamp_ns: frame.timestamp_ns,
            sequence: frame.sequence,
            len: frame.data.len(),
            buffer: Some(buf),
            pool: pool_tx.clone(),
        };
        // A rejected frame drops here and hands its buffer back.
        if sender.try_send(owned).is_err() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    Ok((callback, FrameStream { receiver, dropped }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &[u8], sequence: u32) -> Frame<'_> {
        Frame {
            width: (data.len() / 2) as u32,
            height: 1,
            stride: data.len() as u32,
            format: PixelFormat::U16Le,
            timestamp_ns: sequence as u64 * 1000,
            sequence,
            data,
        }
    }

    #[test]
    fn test_frames_are_copied_in_order() {
        let (mut callback, stream) = frame_channel(2, 8).unwrap();
        callback(&frame(&[1, 2, 3, 4], 1));
        callback(&frame(&[5, 6, 7, 8], 2));

        let first = stream.recv().unwrap();
        assert_eq!(first.data(), &[1, 2, 3, 4]);
        assert_eq!(first.sequence, 1);
        let second = stream.try_recv().unwrap();
        assert_eq!(second.as_frame().raw_at(1, 0), Some(0x0807));
        assert_eq!(stream.dropped(), 0);
    }

    #[test]
    fn test_exhausted_pool_drops_instead_of_blocking() {
        let (mut callback, stream) = frame_channel(1, 4).unwrap();
        callback(&frame(&[1, 1, 1, 1], 1));
        callback(&frame(&[2, 2, 2, 2], 2));
        assert_eq!(stream.dropped(), 1);

        // Releasing the held frame recycles its buffer.
        let held = stream.recv().unwrap();
        assert_eq!(held.sequence, 1);
        drop(held);
        callback(&frame(&[3, 3, 3, 3], 3));
        assert_eq!(stream.recv().unwrap().sequence, 3);
        assert_eq!(stream.dropped(), 1);
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let (mut callback, stream) = frame_channel(1, 2).unwrap();
        callback(&frame(&[1, 2, 3, 4], 1));
        assert_eq!(stream.dropped(), 1);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_timeout_then_stopped() {
        let (mut callback, stream) = frame_channel(1, 2).unwrap();
        let err = stream.recv_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, Tc001Error::Timeout));

        callback(&frame(&[9, 9], 1));
        drop(callback);
        // Queued frames still drain after the producer is gone.
        assert_eq!(stream.recv().unwrap().sequence, 1);
        assert!(matches!(stream.recv(), Err(Tc001Error::StreamStopped)));
        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(5)),
            Err(Tc001Error::StreamStopped)
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            frame_channel(0, 16),
            Err(Tc001Error::InvalidParam(_))
        ));
    }
}
