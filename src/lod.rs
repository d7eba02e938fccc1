// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Level-of-detail filter. When a viewer renders at a zoom level where many
//! transitions fall into the same pixel column, emitting all of them is
//! wasted work. Transitions whose inter-arrival is below `pixel_time_step`
//! are collapsed into a single `GLITCH` marker; when the burst ends, a
//! closing transition restores the actual current value.

use crate::hierarchy::SignalIdx;
use crate::results::{QueryBuffers, Transition1Bit, TransitionMultiBit, GLITCH, GLITCH_STR};

const NO_TIME: u64 = u64::MAX;

/// Per-signal bookkeeping for one query.
///
/// Invariant: `last_emitted_time` / the `shadow_*` values describe the last
/// transition present in the result buffers, while `last_transition_time` /
/// the `glitch_end_*` values track the latest *actual* value change, emitted
/// or swallowed. The synthetic initial emission and same-timestamp
/// coalescing leave `last_transition_time` untouched, so the first distinct
/// change after the window's left edge is always emitted.
#[derive(Debug, Default)]
pub struct LodFilter {
    pixel_time_step: f32,
    last_emitted_time: Vec<u64>,
    last_transition_time: Vec<u64>,
    is_glitch: Vec<bool>,
    last_index_1bit: Vec<Option<u32>>,
    last_index_multi: Vec<Option<u32>>,
    shadow_1bit: Vec<u8>,
    glitch_end_1bit: Vec<u8>,
    shadow_multi: Vec<(u32, u32)>,
    glitch_end_multi: Vec<(u32, u32)>,
    /// Offset of the shared `"GLITCH"` entry in the string pool. Written
    /// once per query, reused by every multi-bit glitch.
    glitch_string: Option<u32>,
}

impl LodFilter {
    pub fn reset(&mut self, signal_count: usize, pixel_time_step: f32) {
        self.pixel_time_step = pixel_time_step;
        self.last_emitted_time = vec![NO_TIME; signal_count];
        self.last_transition_time = vec![NO_TIME; signal_count];
        self.is_glitch = vec![false; signal_count];
        self.last_index_1bit = vec![None; signal_count];
        self.last_index_multi = vec![None; signal_count];
        self.shadow_1bit = vec![0; signal_count];
        self.glitch_end_1bit = vec![0; signal_count];
        self.shadow_multi = vec![(0, 0); signal_count];
        self.glitch_end_multi = vec![(0, 0); signal_count];
        self.glitch_string = None;
    }

    #[inline]
    fn sub_pixel(&self, sig: usize, time: u64) -> bool {
        if self.pixel_time_step <= 0.0 {
            return false;
        }
        let last = self.last_transition_time[sig];
        if last == NO_TIME {
            return false;
        }
        // traces with decreasing timestamps must not underflow here
        match time.checked_sub(last) {
            Some(delta) => delta < self.pixel_time_step as u64,
            None => false,
        }
    }

    /// Left-edge emission: the state restored from the snapshot, surfaced as
    /// a transition so the renderer has a defined value at `time`. Not
    /// subject to glitch checks and not counted as a real value change.
    pub fn emit_initial_1bit(
        &mut self,
        time: u64,
        sig: SignalIdx,
        value: u8,
        bufs: &mut QueryBuffers,
    ) {
        let s = sig as usize;
        self.last_index_1bit[s] = Some(bufs.bits.len() as u32);
        bufs.bits.push(Transition1Bit::new(time, sig, value));
        self.last_emitted_time[s] = time;
        self.shadow_1bit[s] = value;
        self.glitch_end_1bit[s] = value;
        self.is_glitch[s] = false;
    }

    pub fn emit_initial_multibit(
        &mut self,
        time: u64,
        sig: SignalIdx,
        value: &[u8],
        bufs: &mut QueryBuffers,
    ) {
        let s = sig as usize;
        let (offset, length) = bufs.intern(value);
        self.last_index_multi[s] = Some(bufs.vectors.len() as u32);
        bufs.vectors
            .push(TransitionMultiBit::new(time, sig, offset, length));
        self.last_emitted_time[s] = time;
        self.shadow_multi[s] = (offset, length);
        self.glitch_end_multi[s] = (offset, length);
        self.is_glitch[s] = false;
    }

    /// Applies a 1-bit value change. `old` is the value the signal held
    /// before this change.
    pub fn process_1bit(
        &mut self,
        time: u64,
        sig: SignalIdx,
        value: u8,
        old: u8,
        bufs: &mut QueryBuffers,
    ) {
        let s = sig as usize;
        if time == self.last_emitted_time[s] {
            // same timestamp: overwrite the emitted transition in place
            if let Some(last) = self.last_index_1bit[s] {
                bufs.bits[last as usize].value = value;
            }
            self.shadow_1bit[s] = value;
            self.glitch_end_1bit[s] = value;
            return;
        }
        if self.sub_pixel(s, time) {
            if value != old && !self.is_glitch[s] {
                // retroactively turn the last emitted transition into the marker
                if let Some(last) = self.last_index_1bit[s] {
                    bufs.bits[last as usize].value = GLITCH;
                }
                self.is_glitch[s] = true;
            }
        } else if value != old || self.is_glitch[s] {
            if self.is_glitch[s] {
                // close the glitch at the last swallowed change, with the
                // actual current value rather than the pre-glitch shadow
                let close = self.last_transition_time[s];
                self.last_index_1bit[s] = Some(bufs.bits.len() as u32);
                bufs.bits.push(Transition1Bit::new(close, sig, old));
                self.last_emitted_time[s] = close;
                self.shadow_1bit[s] = old;
                self.is_glitch[s] = false;
            }
            if value != old {
                self.last_index_1bit[s] = Some(bufs.bits.len() as u32);
                bufs.bits.push(Transition1Bit::new(time, sig, value));
                self.last_emitted_time[s] = time;
                self.shadow_1bit[s] = value;
            }
        }
        self.last_transition_time[s] = time;
        self.glitch_end_1bit[s] = value;
    }

    /// Applies a multi-bit value change. `changed` compares against the
    /// value the signal held before this change.
    pub fn process_multibit(
        &mut self,
        time: u64,
        sig: SignalIdx,
        value: &[u8],
        changed: bool,
        bufs: &mut QueryBuffers,
    ) {
        let s = sig as usize;
        if time == self.last_emitted_time[s] {
            if let Some(last) = self.last_index_multi[s] {
                let (offset, length) = bufs.intern(value);
                let tr = &mut bufs.vectors[last as usize];
                tr.string_offset = offset;
                tr.string_length = length;
                self.shadow_multi[s] = (offset, length);
                self.glitch_end_multi[s] = (offset, length);
            }
            return;
        }
        if self.sub_pixel(s, time) {
            if changed && !self.is_glitch[s] {
                let glitch_offset = match self.glitch_string {
                    Some(offset) => offset,
                    None => {
                        let (offset, _) = bufs.intern(GLITCH_STR);
                        self.glitch_string = Some(offset);
                        offset
                    }
                };
                // unlike the 1-bit case the marker is a fresh transition at
                // the previous change, so the real value there stays visible
                let marker_time = self.last_transition_time[s];
                self.last_index_multi[s] = Some(bufs.vectors.len() as u32);
                bufs.vectors.push(TransitionMultiBit::new(
                    marker_time,
                    sig,
                    glitch_offset,
                    GLITCH_STR.len() as u32,
                ));
                self.last_emitted_time[s] = marker_time;
                self.is_glitch[s] = true;
            }
            // track the latest actual value for the closing transition
            let (offset, length) = bufs.intern(value);
            self.glitch_end_multi[s] = (offset, length);
        } else if changed || self.is_glitch[s] {
            if self.is_glitch[s] {
                let close = self.last_transition_time[s];
                let (offset, length) = self.glitch_end_multi[s];
                self.last_index_multi[s] = Some(bufs.vectors.len() as u32);
                bufs.vectors
                    .push(TransitionMultiBit::new(close, sig, offset, length));
                self.last_emitted_time[s] = close;
                self.shadow_multi[s] = (offset, length);
                self.is_glitch[s] = false;
            }
            if changed {
                let (offset, length) = bufs.intern(value);
                self.last_index_multi[s] = Some(bufs.vectors.len() as u32);
                bufs.vectors
                    .push(TransitionMultiBit::new(time, sig, offset, length));
                self.last_emitted_time[s] = time;
                self.shadow_multi[s] = (offset, length);
                self.glitch_end_multi[s] = (offset, length);
            }
        }
        self.last_transition_time[s] = time;
    }

    /// Closes any still-open glitch at the end of a query by emitting the
    /// actual current value at the last swallowed change.
    pub fn flush_glitches(&mut self, bufs: &mut QueryBuffers) {
        for s in 0..self.is_glitch.len() {
            if !self.is_glitch[s] {
                continue;
            }
            let close = self.last_transition_time[s];
            if self.last_index_1bit[s].is_some() {
                self.last_index_1bit[s] = Some(bufs.bits.len() as u32);
                bufs.bits.push(Transition1Bit::new(
                    close,
                    s as SignalIdx,
                    self.glitch_end_1bit[s],
                ));
            } else if self.last_index_multi[s].is_some() {
                let (offset, length) = self.glitch_end_multi[s];
                self.last_index_multi[s] = Some(bufs.vectors.len() as u32);
                bufs.vectors.push(TransitionMultiBit::new(
                    close,
                    s as SignalIdx,
                    offset,
                    length,
                ));
                self.shadow_multi[s] = (offset, length);
            }
            self.last_emitted_time[s] = close;
            self.is_glitch[s] = false;
        }
    }
}
