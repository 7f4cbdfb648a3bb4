// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring buffers for SCD drivers
//!
//! A [`TraceLog`] is a fixed-capacity ring of trace entries owned by whoever
//! creates it (typically one per device context) and handed to the code that
//! should record into it.  Unlike a process-wide debug knob, the verbosity is
//! a property of the log itself: every entry is recorded at a [`Level`], and
//! entries above the log's level are dropped before they touch the ring.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`.  When an
//! entry is recorded with an identical payload to the most recent entry (in
//! terms of both `line` and `payload`), that entry's `count` is incremented
//! rather than consuming a new slot, so a tight polling loop costs one slot.
//!
//! ## Recording
//!
//! Entries are generated with [`ringbuf_entry!`], which supplies the source
//! line:
//!
//! ```
//! ringbuf_entry!(self.trace, Level::Debug, Trace::Request(word));
//! ```
//!
//! ## Inspecting
//!
//! [`TraceLog::snapshot`] returns the live entries oldest first; the
//! `scd-topology` tool prints them with `--trace`.

use std::sync::{Mutex, PoisonError};

use num_derive::FromPrimitive;

/// Verbosity of a trace entry, and the threshold of a [`TraceLog`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, FromPrimitive)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl core::str::FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Level::Error),
            "warn" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            _ => Err(()),
        }
    }
}

impl core::fmt::Display for Level {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
        })
    }
}

///
/// A single trace entry.  `generation` is bumped every time the slot holding
/// the entry is reused, which makes wraparound visible when reading a dump.
///
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub level: Level,
    pub payload: T,
}

///
/// The ring itself.  Slots start out empty; `last` is the index of the most
/// recently written slot.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    generations: [u16; N],
    buffer: [Option<RingbufEntry<T>>; N],
}

impl<T: Copy + PartialEq, const N: usize> Default for Ringbuf<T, { N }> {
    fn default() -> Self {
        Self {
            last: None,
            generations: [0; N],
            buffer: [None; N],
        }
    }
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    pub fn entry(&mut self, line: u16, level: Level, payload: T) {
        if N == 0 {
            return;
        }

        if let Some(Some(ent)) = self.last.map(|ndx| &mut self.buffer[ndx]) {
            if ent.line == line && ent.level == level && ent.payload == payload
            {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        let ndx = match self.last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };

        let generation = self.generations[ndx].wrapping_add(1);
        self.generations[ndx] = generation;
        self.buffer[ndx] = Some(RingbufEntry {
            line,
            generation,
            count: 1,
            level,
            payload,
        });
        self.last = Some(ndx);
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = self.last.map_or(0, |last| last + 1);
        (0..N)
            .map(move |i| (start + i) % N)
            .filter_map(move |ndx| self.buffer[ndx].as_ref())
    }
}

///
/// A shareable, level-gated trace ring.  Recording takes a short internal
/// lock; it never blocks on anything else and never fails.
///
#[derive(Debug)]
pub struct TraceLog<T: Copy + PartialEq, const N: usize> {
    level: Level,
    ring: Mutex<Ringbuf<T, N>>,
}

impl<T: Copy + PartialEq, const N: usize> TraceLog<T, { N }> {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ring: Mutex::new(Ringbuf::default()),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        !cfg!(feature = "disabled") && level <= self.level
    }

    pub fn record(&self, level: Level, line: u16, payload: T) {
        if self.enabled(level) {
            self.ring
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(line, level, payload);
        }
    }

    pub fn snapshot(&self) -> Vec<RingbufEntry<T>> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

/// Records `payload` at `level` into a [`TraceLog`], tagged with the current
/// source line.
///
/// `ringbuf_entry!(log, level, payload)` evaluates `log`, `level` and
/// `payload` exactly once each.
#[macro_export]
macro_rules! ringbuf_entry {
    ($log:expr, $level:expr, $payload:expr) => {{
        // Evaluate all three without letting them see each other's bindings.
        let (p, l, log) = ($payload, $level, &$log);
        log.record(l, line!() as u16, p);
    }};
}
