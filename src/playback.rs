//! Track playback.
//!
//! A [`TrackPlayer`] is one consumer of a [`TrackStreamingCache`]. Every tick
//! it publishes the window it needs, decodes the frames around the play
//! head from mapped chunks and blends them when their topology matches.
//! A frame whose chunk is not resident yet, or fails to decode, leaves the
//! previous frame on display.

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::codec::DecodeState;
use crate::config::PlaybackConfig;
use crate::geom::{interpolate_frames, MeshFrame};
use crate::streaming::{ConsumerId, TrackStreamingCache};
use crate::track::StreamableTrack;
use crate::util::{Chrono, Error, Result};

/// What a tick produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameStatus {
    /// Track is hidden at this time
    Hidden,
    /// `frame` shown as decoded
    Shown { frame: usize },
    /// Blend of `frame` and `next`
    Interpolated { frame: usize, next: usize, factor: f32 },
    /// Wanted frame unavailable; the previously shown frame, if any, is kept
    Held { wanted: usize, shown: Option<usize> },
}

/// Decoded frame slot.
#[derive(Debug, Default)]
struct Slot {
    mesh: MeshFrame,
    frame: Option<usize>,
}

/// Plays one track through its streaming cache.
pub struct TrackPlayer {
    cache: Arc<TrackStreamingCache>,
    consumer: ConsumerId,
    config: PlaybackConfig,
    reversed: bool,
    state: DecodeState,
    current: Slot,
    next: Slot,
    scratch: MeshFrame,
    blended: MeshFrame,
    show_blended: bool,
    status: Option<FrameStatus>,
}

impl std::fmt::Debug for TrackPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackPlayer")
            .field("track", &self.cache.track().name())
            .field("consumer", &self.consumer)
            .field("current", &self.current.frame)
            .field("next", &self.next.frame)
            .field("status", &self.status)
            .finish()
    }
}

impl TrackPlayer {
    /// Register a new consumer on `cache`.
    pub fn new(cache: Arc<TrackStreamingCache>, config: PlaybackConfig) -> Self {
        let consumer = cache.register_consumer();
        let state = cache.track().create_decode_state();
        Self {
            cache,
            consumer,
            config,
            reversed: false,
            state,
            current: Slot::default(),
            next: Slot::default(),
            scratch: MeshFrame::new(),
            blended: MeshFrame::new(),
            show_blended: false,
            status: None,
        }
    }

    pub fn track(&self) -> &Arc<StreamableTrack> {
        self.cache.track()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PlaybackConfig) {
        self.config = config;
    }

    /// Play backwards: the blend runs from the later frame to the earlier.
    pub fn set_reversed(&mut self, reversed: bool) {
        self.reversed = reversed;
    }

    /// Block until the chunks for `[time, time + window]` are resident.
    pub fn prefetch(&self, time: Chrono, window: Chrono, timeout: Duration) -> Result<()> {
        self.cache
            .prefetch(self.consumer, time, time + window, self.config.looping, timeout)
    }

    /// Frame currently on display.
    pub fn frame(&self) -> Option<&MeshFrame> {
        if self.show_blended {
            Some(&self.blended)
        } else {
            self.current.frame.map(|_| &self.current.mesh)
        }
    }

    /// Result of the last tick.
    pub fn status(&self) -> Option<FrameStatus> {
        self.status
    }

    /// Advance to `time`.
    pub fn tick(&mut self, time: Chrono) -> FrameStatus {
        let looping = self.config.looping;
        self.cache
            .set_window(self.consumer, time, time + self.config.lookahead, looping);

        let status = self.present(time, looping);
        self.status = Some(status);
        status
    }

    fn present(&mut self, time: Chrono, looping: bool) -> FrameStatus {
        let track = self.cache.track().clone();
        if track.frame_count() == 0 || !track.visibility_at(time, looping) {
            self.show_blended = false;
            return FrameStatus::Hidden;
        }

        let interp = track.find_sample_indexes_from_time(time, looping, self.reversed);
        let frame = interp.frame_index;

        if self.current.frame != Some(frame) {
            if self.next.frame == Some(frame) {
                // Stepped forward onto the frame decoded as "next".
                std::mem::swap(&mut self.current, &mut self.next);
            } else if !self.load(frame, true) {
                self.show_blended = false;
                return FrameStatus::Held {
                    wanted: frame,
                    shown: self.current.frame,
                };
            }
        }

        let next = interp.next_frame_index;
        let blend = self.config.interpolate_frames
            && interp.factor > 0.0
            && next != frame
            && track.is_same_topology(frame, next);
        if blend && (self.next.frame == Some(next) || self.load(next, false)) {
            interpolate_frames(&self.current.mesh, &self.next.mesh, interp.factor, &mut self.blended);
            self.show_blended = true;
            return FrameStatus::Interpolated {
                frame,
                next,
                factor: interp.factor,
            };
        }

        self.show_blended = false;
        FrameStatus::Shown { frame }
    }

    /// Decode `frame` into the current (or next) slot. On failure the slot
    /// keeps its previous frame.
    fn load(&mut self, frame: usize, into_current: bool) -> bool {
        match self.decode(frame) {
            Ok(true) => {
                let slot = if into_current { &mut self.current } else { &mut self.next };
                std::mem::swap(&mut slot.mesh, &mut self.scratch);
                slot.frame = Some(frame);
                true
            }
            Ok(false) => {
                trace!(frame, "chunk not resident, holding previous frame");
                false
            }
            Err(e) => {
                warn!("Failed to decode frame {} of track '{}': {}", frame, self.track().name(), e);
                false
            }
        }
    }

    /// Decode `frame` into scratch. `Ok(false)` when its chunk is not mapped.
    fn decode(&mut self, frame: usize) -> Result<bool> {
        let cache = self.cache.clone();
        let track = cache.track();
        let chunk = track.chunk_for_frame(frame)?;

        if frame != 0 && !self.state.has_keyframe() && !self.decode_keyframe(&cache)? {
            return Ok(false);
        }
        let Some(mapping) = cache.map_chunk(chunk) else {
            return Ok(false);
        };
        match track.decode_chunk(&mut self.state, &mapping, &mut self.scratch) {
            Err(Error::MissingKeyframe { .. }) => {
                drop(mapping);
                self.state.reset();
                if !self.decode_keyframe(&cache)? {
                    return Ok(false);
                }
                let Some(mapping) = cache.map_chunk(chunk) else {
                    return Ok(false);
                };
                track.decode_chunk(&mut self.state, &mapping, &mut self.scratch)?;
                Ok(true)
            }
            result => result.map(|_| true),
        }
    }

    /// Decode frame 0 so the state holds the constant streams.
    fn decode_keyframe(&mut self, cache: &TrackStreamingCache) -> Result<bool> {
        let chunk = cache.track().chunk_for_frame(0)?;
        let Some(mapping) = cache.map_chunk(chunk) else {
            return Ok(false);
        };
        cache
            .track()
            .decode_chunk(&mut self.state, &mapping, &mut self.scratch)?;
        Ok(true)
    }
}

impl Drop for TrackPlayer {
    fn drop(&mut self) {
        self.cache.unregister_consumer(self.consumer);
    }
}
