//! Media units exchanged between producers, queues and devices
//!
//! Every unit carries a `Uuid` identity. Completion callbacks are matched to
//! scheduled records by identity, never by buffer address.

use crate::hardware::mode::PixelFormat;
use genlock_common::time::{duration_for_samples, TimeScale, TimeValue};
use std::sync::Arc;
use uuid::Uuid;

/// One video frame with its presentation time
///
/// `stream_time` and `duration` are in the time scale of the display mode the
/// frame was produced for.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    id: Uuid,
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
    pub stream_time: TimeValue,
    pub duration: TimeValue,
}

impl VideoFrame {
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: Vec<u8>,
        stream_time: TimeValue,
        duration: TimeValue,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            width,
            height,
            row_bytes: pixel_format.row_bytes(width),
            pixel_format,
            data,
            stream_time,
            duration,
        }
    }

    /// Frame without pixel data (tests and timing-only producers)
    pub fn blank(stream_time: TimeValue, duration: TimeValue) -> Self {
        Self::new(0, 0, PixelFormat::Yuv10Bit, Vec::new(), stream_time, duration)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Block of interleaved 16-bit audio sample frames
#[derive(Debug, Clone)]
pub struct AudioPacket {
    id: Uuid,
    pub channels: u32,
    pub samples: Vec<i16>,
    pub stream_time: TimeValue,
}

impl AudioPacket {
    pub fn new(channels: u32, samples: Vec<i16>, stream_time: TimeValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            channels: channels.max(1),
            samples,
            stream_time,
        }
    }

    /// Silent packet of `frames` sample frames
    pub fn silence(channels: u32, frames: u32, stream_time: TimeValue) -> Self {
        let channels = channels.max(1);
        Self::new(channels, vec![0; (frames * channels) as usize], stream_time)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of sample frames (one sample per channel)
    pub fn sample_frames(&self) -> u32 {
        (self.samples.len() / self.channels as usize) as u32
    }

    /// Remainder of this packet after the first `written` sample frames
    ///
    /// Used when a device accepts only part of a block. The remainder's stream
    /// time is advanced by the duration of the written frames.
    pub fn remainder(&self, written: u32, scale: TimeScale, sample_rate: u32) -> Option<Self> {
        if written >= self.sample_frames() {
            return None;
        }
        let start = (written * self.channels) as usize;
        Some(Self {
            id: self.id,
            channels: self.channels,
            samples: self.samples[start..].to_vec(),
            stream_time: self.stream_time
                + duration_for_samples(written as u64, scale, sample_rate),
        })
    }
}

/// Unit of media flowing from a producer to a scheduler
#[derive(Debug, Clone)]
pub enum MediaUnit {
    Video(Arc<VideoFrame>),
    Audio(AudioPacket),
}

impl MediaUnit {
    pub fn id(&self) -> Uuid {
        match self {
            MediaUnit::Video(frame) => frame.id(),
            MediaUnit::Audio(packet) => packet.id(),
        }
    }

    pub fn stream_time(&self) -> TimeValue {
        match self {
            MediaUnit::Video(frame) => frame.stream_time,
            MediaUnit::Audio(packet) => packet.stream_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_have_distinct_identity() {
        let a = VideoFrame::blank(0, 1000);
        let b = VideoFrame::blank(0, 1000);
        assert_ne!(a.id(), b.id());

        // Clones keep identity
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_audio_packet_remainder() {
        let packet = AudioPacket::silence(2, 1920, 1000);
        assert_eq!(packet.sample_frames(), 1920);

        let rest = packet.remainder(960, 25000, 48000).unwrap();
        assert_eq!(rest.sample_frames(), 960);
        assert_eq!(rest.stream_time, 1500);
        assert!(packet.remainder(1920, 25000, 48000).is_none());
    }

    #[test]
    fn test_media_unit_accessors() {
        let frame = Arc::new(VideoFrame::blank(2000, 1000));
        let unit = MediaUnit::Video(frame.clone());
        assert_eq!(unit.id(), frame.id());
        assert_eq!(unit.stream_time(), 2000);
    }
}
