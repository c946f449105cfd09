//! Playback buffer shared by the download loop and the playback clock.
//!
//! Only [`BufferModel::push`] adds media and only [`BufferModel::drain`] removes
//! it. Both run under the same lock, so the two activities never interleave a
//! read-modify-write of the buffer level.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Tolerance for float comparisons on buffer seconds.
pub(crate) const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackState {
    /// Waiting for the initial buffer to fill. The clock does not drain.
    InitialBuffering,
    Playing,
    /// Buffer ran dry while segments were still outstanding.
    Stalled,
    /// Every buffered segment has been played and no more will arrive.
    Ended,
}

/// Point-in-time view of the buffer, handed to adaptation strategies and events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferSnapshot {
    pub buffered_seconds: f64,
    pub buffered_segments: usize,
    pub playback_position: f64,
    pub state: PlaybackState,
}

impl BufferSnapshot {
    pub fn is_stalled(&self) -> bool {
        self.state == PlaybackState::Stalled
    }

    /// An empty buffer that has not started playing.
    pub fn empty() -> Self {
        Self {
            buffered_seconds: 0.0,
            buffered_segments: 0,
            playback_position: 0.0,
            state: PlaybackState::InitialBuffering,
        }
    }
}

/// What a clock tick did to the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainOutcome {
    pub snapshot: BufferSnapshot,
    /// Segments whose last second was played during this tick.
    pub finished: Vec<u64>,
    /// The buffer ran dry during this tick.
    pub stalled: bool,
    /// Playback reached the end during this tick.
    pub ended: bool,
}

#[derive(Debug)]
struct BufferedSegment {
    sequence_number: u64,
    remaining: f64,
}

#[derive(Debug)]
struct BufferInner {
    segments: VecDeque<BufferedSegment>,
    buffered_seconds: f64,
    playback_position: f64,
    state: PlaybackState,
    downloads_complete: bool,
    segments_played: u64,
    last_played: Option<u64>,
    stall_events: u32,
    stall_seconds: f64,
}

impl BufferInner {
    fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            buffered_seconds: self.buffered_seconds,
            buffered_segments: self.segments.len(),
            playback_position: self.playback_position,
            state: self.state,
        }
    }
}

#[derive(Debug)]
pub struct BufferModel {
    inner: Mutex<BufferInner>,
    capacity: f64,
    initial: f64,
    changed: Notify,
}

impl BufferModel {
    pub fn new(capacity_seconds: f64, initial_buffer_seconds: f64) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                segments: VecDeque::new(),
                buffered_seconds: 0.0,
                playback_position: 0.0,
                state: PlaybackState::InitialBuffering,
                downloads_complete: false,
                segments_played: 0,
                last_played: None,
                stall_events: 0,
                stall_seconds: 0.0,
            }),
            capacity: capacity_seconds,
            initial: initial_buffer_seconds.min(capacity_seconds),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        // A panic while holding the lock leaves plain numbers behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.lock().snapshot()
    }

    pub fn segments_played(&self) -> u64 {
        self.lock().segments_played
    }

    /// Sequence number of the most recently completed segment.
    pub fn last_played(&self) -> Option<u64> {
        self.lock().last_played
    }

    pub fn stall_events(&self) -> u32 {
        self.lock().stall_events
    }

    pub fn stall_seconds(&self) -> f64 {
        self.lock().stall_seconds
    }

    /// Whether a segment of `duration` seconds fits without exceeding capacity.
    pub fn has_room_for(&self, duration: f64) -> bool {
        self.lock().buffered_seconds + duration <= self.capacity + EPSILON
    }

    /// Adds a completed download. Returns `true` if this ended a stall.
    pub fn push(&self, sequence_number: u64, duration: f64) -> bool {
        let mut inner = self.lock();
        debug_assert!(inner.buffered_seconds + duration <= self.capacity + EPSILON);
        inner.segments.push_back(BufferedSegment {
            sequence_number,
            remaining: duration,
        });
        inner.buffered_seconds += duration;

        let mut resumed = false;
        match inner.state {
            PlaybackState::Stalled => {
                info!("Segment {sequence_number} arrived, resuming playback");
                inner.state = PlaybackState::Playing;
                resumed = true;
            }
            PlaybackState::InitialBuffering if inner.buffered_seconds + EPSILON >= self.initial => {
                info!("Initial buffer of {:.2}s reached, starting playback", inner.buffered_seconds);
                inner.state = PlaybackState::Playing;
            }
            _ => {}
        }
        drop(inner);
        self.changed.notify_waiters();
        resumed
    }

    /// Advances the playback clock by `elapsed` seconds.
    pub fn drain(&self, elapsed: f64) -> DrainOutcome {
        let mut inner = self.lock();
        let mut finished = Vec::new();
        let mut stalled = false;
        let mut ended = false;

        if inner.state == PlaybackState::InitialBuffering && inner.downloads_complete {
            // Short presentations may never reach the initial threshold.
            inner.state = if inner.segments.is_empty() {
                PlaybackState::Ended
            } else {
                PlaybackState::Playing
            };
        }

        match inner.state {
            PlaybackState::Playing => {
                let mut left = elapsed.max(0.0);
                while left > EPSILON {
                    let Some(front) = inner.segments.front_mut() else { break };
                    let step = front.remaining.min(left);
                    front.remaining -= step;
                    left -= step;
                    if front.remaining <= EPSILON {
                        let done = front.sequence_number;
                        inner.segments.pop_front();
                        inner.segments_played += 1;
                        inner.last_played = Some(done);
                        finished.push(done);
                    }
                    inner.buffered_seconds = (inner.buffered_seconds - step).max(0.0);
                    inner.playback_position += step;
                }
                if inner.segments.is_empty() {
                    inner.buffered_seconds = 0.0;
                    if inner.downloads_complete {
                        info!("Playback finished at {:.2}s", inner.playback_position);
                        inner.state = PlaybackState::Ended;
                        ended = true;
                    } else {
                        inner.state = PlaybackState::Stalled;
                        inner.stall_events += 1;
                        inner.stall_seconds += left;
                        stalled = true;
                        info!("Buffer empty at {:.2}s, playback stalled", inner.playback_position);
                    }
                }
            }
            PlaybackState::Stalled => inner.stall_seconds += elapsed.max(0.0),
            PlaybackState::InitialBuffering | PlaybackState::Ended => {}
        }

        let snapshot = inner.snapshot();
        drop(inner);
        self.changed.notify_waiters();
        DrainOutcome {
            snapshot,
            finished,
            stalled,
            ended,
        }
    }

    /// Starts playback even though the initial threshold has not been reached.
    pub fn force_start(&self) {
        let mut inner = self.lock();
        if inner.state == PlaybackState::InitialBuffering && !inner.segments.is_empty() {
            debug!("Buffer full before the initial threshold, starting playback early");
            inner.state = PlaybackState::Playing;
        }
    }

    /// Marks that no further segments will be pushed.
    pub fn finish_downloads(&self) {
        let mut inner = self.lock();
        inner.downloads_complete = true;
        if inner.segments.is_empty()
            && matches!(inner.state, PlaybackState::Stalled | PlaybackState::InitialBuffering)
        {
            inner.state = PlaybackState::Ended;
        }
        drop(inner);
        self.changed.notify_waiters();
    }

    /// Waits until a segment of `duration` seconds fits in the buffer.
    pub async fn wait_for_room(&self, duration: f64) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.has_room_for(duration) {
                return;
            }
            self.force_start();
            notified.await;
        }
    }

    /// Waits until every buffered second has been played.
    pub async fn wait_until_ended(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.snapshot().state == PlaybackState::Ended {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_starts_after_initial_buffer() {
        let buffer = BufferModel::new(10.0, 4.0);
        buffer.push(1, 2.0);
        assert_eq!(buffer.drain(1.0).snapshot.state, PlaybackState::InitialBuffering);
        assert_eq!(buffer.snapshot().buffered_seconds, 2.0);
        buffer.push(2, 2.0);
        assert_eq!(buffer.snapshot().state, PlaybackState::Playing);
    }

    #[test]
    fn drain_finishes_segments_in_order() {
        let buffer = BufferModel::new(10.0, 0.0);
        buffer.push(1, 2.0);
        buffer.push(2, 2.0);
        let outcome = buffer.drain(3.0);
        assert_eq!(outcome.finished, vec![1]);
        assert!((outcome.snapshot.buffered_seconds - 1.0).abs() < 1e-9);
        assert!((outcome.snapshot.playback_position - 3.0).abs() < 1e-9);
        assert_eq!(buffer.segments_played(), 1);
    }

    #[test]
    fn running_dry_with_outstanding_segments_stalls() {
        let buffer = BufferModel::new(10.0, 0.0);
        buffer.push(1, 2.0);
        let outcome = buffer.drain(3.0);
        assert!(outcome.stalled);
        assert_eq!(outcome.snapshot.buffered_seconds, 0.0);
        assert!(outcome.snapshot.is_stalled());
        assert_eq!(buffer.stall_events(), 1);
        assert!((buffer.stall_seconds() - 1.0).abs() < 1e-9);

        // Stalled ticks accumulate stall time but not new stall events
        buffer.drain(1.0);
        assert_eq!(buffer.stall_events(), 1);

        assert!(buffer.push(2, 2.0));
        assert_eq!(buffer.snapshot().state, PlaybackState::Playing);
    }

    #[test]
    fn running_dry_after_last_segment_ends_playback() {
        let buffer = BufferModel::new(10.0, 0.0);
        buffer.push(1, 2.0);
        buffer.finish_downloads();
        let outcome = buffer.drain(5.0);
        assert!(outcome.ended);
        assert!(!outcome.stalled);
        assert_eq!(buffer.stall_events(), 0);
    }

    #[test]
    fn short_presentation_plays_below_initial_threshold() {
        let buffer = BufferModel::new(30.0, 10.0);
        buffer.push(1, 2.0);
        buffer.finish_downloads();
        assert_eq!(buffer.drain(1.0).snapshot.state, PlaybackState::Playing);
        assert!(buffer.drain(1.0).ended);
    }

    #[test]
    fn room_check_respects_capacity() {
        let buffer = BufferModel::new(6.0, 0.0);
        buffer.push(1, 2.0);
        buffer.push(2, 2.0);
        assert!(buffer.has_room_for(2.0));
        buffer.push(3, 2.0);
        assert!(!buffer.has_room_for(2.0));
        buffer.drain(2.0);
        assert!(buffer.has_room_for(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_room_resumes_after_drain() {
        let buffer = std::sync::Arc::new(BufferModel::new(4.0, 4.0));
        buffer.push(1, 2.0);
        buffer.push(2, 2.0);
        let clock = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            clock.drain(2.0);
        });
        buffer.wait_for_room(2.0).await;
        assert!(buffer.snapshot().buffered_seconds <= 2.0 + 1e-9);
    }
}
