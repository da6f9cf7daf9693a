//! Perch daemon internals.
//!
//! The daemon is a small single-writer service: one background thread
//! accepts connections on a Unix socket and decodes lifecycle
//! notifications, one dispatch thread owns every piece of mutable
//! state (mood, session statistics, timers). The two sides meet at an
//! mpsc channel, so state transitions are serialized no matter how
//! connections interleave.

pub mod installer;
pub mod listener;
pub mod stats;
pub mod timer;
pub mod tracker;
