//! Length-prefixed framing for envelope streams.
//!
//! Wire format: `[4-byte big-endian length][envelope bytes]`

use crate::error::{HuskyError, HuskyResult};

/// Default upper bound for a single frame (1 MiB).
pub const DEFAULT_MAX_FRAME: usize = 1 << 20;

/// Prefix an encoded envelope with its length.
pub fn frame_encode(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Streaming frame decoder: accumulates bytes and yields complete payloads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
        }
    }

    /// Feed bytes and return every complete payload.
    ///
    /// A length header above the frame limit fails with
    /// [`HuskyError::TooLarge`]; the stream cannot be resynchronized after
    /// that and the connection should be dropped.
    pub fn feed(&mut self, data: &[u8]) -> HuskyResult<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            if self.buffer.len() < 4 {
                break;
            }
            let len =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;

            if len > self.max_frame {
                return Err(HuskyError::TooLarge {
                    size: len,
                    max: self.max_frame,
                });
            }
            if self.buffer.len() < 4 + len {
                break;
            }

            frames.push(self.buffer[4..4 + len].to_vec());
            self.buffer.drain(..4 + len);
        }

        Ok(frames)
    }

    /// Reset internal buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_frames_in_one_feed() {
        let mut combined = Vec::new();
        for p in [&b"one"[..], b"two", b""] {
            combined.extend(frame_encode(p));
        }

        let mut decoder = FrameDecoder::default();
        let frames = decoder.feed(&combined).unwrap();
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec(), Vec::new()]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn incremental_feed() {
        let frame = frame_encode(br#"{"Id":"HeartBeat"}"#);
        let mut decoder = FrameDecoder::default();

        // Feed one byte at a time
        for i in 0..frame.len() - 1 {
            assert!(decoder.feed(&frame[i..i + 1]).unwrap().is_empty());
        }
        let frames = decoder.feed(&frame[frame.len() - 1..]).unwrap();
        assert_eq!(frames, vec![br#"{"Id":"HeartBeat"}"#.to_vec()]);
    }

    #[test]
    fn pending_bytes() {
        let frame = frame_encode(b"payload");
        let mut decoder = FrameDecoder::default();

        decoder.feed(&frame[..3]).unwrap();
        assert_eq!(decoder.pending(), 3);

        decoder.reset();
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut decoder = FrameDecoder::new(8);
        let err = decoder.feed(&frame_encode(b"0123456789")).unwrap_err();
        assert!(matches!(err, HuskyError::TooLarge { size: 10, max: 8 }));
    }
}
