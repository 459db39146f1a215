//! Bookkeeping for frames handed to the device

use crate::hardware::{FrameCompletionResult, TimeValue};
use crate::media::VideoFrame;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// One scheduled frame, from schedule call to completion callback
#[derive(Debug, Clone)]
pub struct ScheduledFrameRecord {
    pub frame: Arc<VideoFrame>,
    /// Device-timeline time the frame was scheduled for
    pub display_time: TimeValue,
    /// Hardware clock when the schedule call was made
    pub scheduled_hardware_time: TimeValue,
    /// Hardware time the frame finished displaying (set on completion)
    pub completed_hardware_time: Option<TimeValue>,
    pub completion_result: Option<FrameCompletionResult>,
}

/// In-flight frames in scheduling order
///
/// Completions arrive in FIFO order per stream, so the matching record is
/// almost always at the front; the scan still covers the whole list.
#[derive(Debug, Default)]
pub struct ScheduledFrames {
    records: VecDeque<ScheduledFrameRecord>,
}

impl ScheduledFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ScheduledFrameRecord) {
        self.records.push_back(record);
    }

    /// Remove and return the record for `id`
    ///
    /// Returns `None` for unknown or already-completed frames.
    pub fn complete(&mut self, id: Uuid) -> Option<ScheduledFrameRecord> {
        let index = self.records.iter().position(|r| r.frame.id() == id)?;
        self.records.remove(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(display_time: TimeValue) -> ScheduledFrameRecord {
        ScheduledFrameRecord {
            frame: Arc::new(VideoFrame::blank(display_time, 1000)),
            display_time,
            scheduled_hardware_time: 0,
            completed_hardware_time: None,
            completion_result: None,
        }
    }

    #[test]
    fn test_complete_removes_exactly_once() {
        let mut frames = ScheduledFrames::new();
        let first = record(0);
        let id = first.frame.id();
        frames.push(first);
        frames.push(record(1000));

        let done = frames.complete(id).unwrap();
        assert_eq!(done.display_time, 0);
        assert_eq!(frames.len(), 1);

        // Duplicate completion is a no-op
        assert!(frames.complete(id).is_none());
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_complete_out_of_order() {
        let mut frames = ScheduledFrames::new();
        let a = record(0);
        let b = record(1000);
        let b_id = b.frame.id();
        frames.push(a);
        frames.push(b);
        frames.push(record(2000));

        assert_eq!(frames.complete(b_id).unwrap().display_time, 1000);
        assert_eq!(frames.len(), 2);
        assert!(frames.complete(b_id).is_none());
    }

    #[test]
    fn test_unknown_completion_is_ignored() {
        let mut frames = ScheduledFrames::new();
        frames.push(record(0));
        assert!(frames.complete(Uuid::new_v4()).is_none());
        assert_eq!(frames.len(), 1);
    }
}
