// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Waveform-trace ingestion and query engine for interactive viewers.
//!
//! The core is a streaming VCD parser with a two-phase pipeline: an indexing
//! pass that records sparse state snapshots at byte intervals, and a query
//! pass that restores the nearest snapshot, replays a bounded slice of the
//! trace and emits packed transition buffers suitable for zero-copy handoff
//! to a host environment. A thin FST adapter answers the same queries
//! through the `fst-reader` crate.

mod fst;
mod hierarchy;
mod lod;
mod readers;
mod results;
mod scanner;
mod snapshot;
mod state;
mod vcd;

/// Cargo.toml version of this library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub enum FileFormat {
    Vcd,
    Fst,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum PegelError {
    #[error("failed to load {0:?}:\n{1}")]
    FailedToLoad(FileFormat, String),
    #[error("unknown file format, only FST and VCD are supported")]
    UnknownFileFormat,
    #[error("io error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PegelError>;

pub use fst::{FstError, FstParser};
pub use hierarchy::{
    ScopeIdx, ScopeNode, Signal, SignalIdx, SignalStorage, SymbolTable, Timescale, TimescaleUnit,
    VarIndex, VarType,
};
pub use readers::{detect_file_format, read_vcd_file, WaveformReader};
pub use results::{QueryResultBinary, Transition1Bit, TransitionMultiBit, GLITCH, GLITCH_STR};
pub use scanner::Scanner;
pub use snapshot::QueryPlan;
pub use state::BitValue;
pub use vcd::{
    IndexOptions, ParseStats, VcdError, VcdParser, DEFAULT_SNAPSHOT_INTERVAL,
};
