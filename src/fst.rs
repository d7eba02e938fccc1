// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Thin adapter that lets FST dumps answer the same time-range queries as
//! the streaming VCD engine. FST files carry their own value index, so the
//! indexing phase is trivially complete after `open`; queries go through the
//! `fst-reader` crate and are funneled into the shared LOD filter and result
//! buffers.

use crate::hierarchy::{
    Signal, SignalIdx, SignalStorage, SymbolTable, Timescale, TimescaleUnit, VarType,
};
use crate::lod::LodFilter;
use crate::results::{QueryBuffers, QueryResultBinary};
use crate::snapshot::QueryPlan;
use crate::state::BitValue;
use fst_reader::{
    FstFilter, FstHierarchyEntry, FstReader, FstSignalHandle, FstSignalValue, FstVarType,
};
use rustc_hash::FxHashMap;
use std::io::{BufRead, Seek};

#[derive(Debug, thiserror::Error)]
pub enum FstError {
    #[error("[fst] {0}")]
    Reader(#[from] fst_reader::ReaderError),
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FstError>;

#[derive(Debug, Default)]
struct FstQuery {
    t_begin: u64,
    t_end: u64,
    pixel_time_step: f32,
    signal_indices: Vec<SignalIdx>,
    ran: bool,
    lod: LodFilter,
    bufs: QueryBuffers,
}

pub struct FstParser<R: BufRead + Seek> {
    reader: FstReader<R>,
    table: SymbolTable,
    date: String,
    version: String,
    timescale: Timescale,
    t_begin: u64,
    t_end: u64,
    query: FstQuery,
}

impl FstParser<std::io::BufReader<std::fs::File>> {
    pub fn open_file<P: AsRef<std::path::Path>>(filename: P) -> Result<Self> {
        let input = std::io::BufReader::new(std::fs::File::open(filename)?);
        Self::open(input)
    }
}

impl<R: BufRead + Seek> FstParser<R> {
    pub fn open(input: R) -> Result<Self> {
        let mut reader = FstReader::open_and_read_time_table(input)?;
        let header = reader.get_header();
        let date = header.date.trim().to_string();
        let version = header.version.trim().to_string();
        let timescale = timescale_from_exponent(header.timescale_exponent);
        let t_begin = header.start_time;
        let t_end = header.end_time;

        let mut table = SymbolTable::new();
        let callback = |entry: FstHierarchyEntry| match entry {
            FstHierarchyEntry::Scope { name, .. } => {
                table.declare_scope(&name);
            }
            FstHierarchyEntry::UpScope => table.close_scope(),
            FstHierarchyEntry::Var {
                tpe,
                name,
                length,
                handle,
                ..
            } => {
                // vars sharing a handle are aliases; the handle plays the
                // role of the VCD id code
                let id_code = handle.get_index().to_string();
                let width = effective_width(tpe, length);
                table.declare_signal(
                    &name,
                    id_code.as_bytes(),
                    var_type_from_fst(tpe),
                    width,
                    None,
                );
            }
            // attributes, enums and source locations are not part of the model
            _ => {}
        };
        reader.read_hierarchy(callback)?;
        table.seal();

        Ok(FstParser {
            reader,
            table,
            date,
            version,
            timescale,
            t_begin,
            t_end,
            query: FstQuery::default(),
        })
    }

    // --- metadata, mirroring the VCD parser -------------------------------

    pub fn is_open(&self) -> bool {
        true
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn timescale(&self) -> Timescale {
        self.timescale
    }

    pub fn time_begin(&self) -> u64 {
        self.t_begin
    }

    pub fn time_end(&self) -> u64 {
        self.t_end
    }

    pub fn signal_count(&self) -> usize {
        self.table.signal_count()
    }

    pub fn signals(&self) -> &[Signal] {
        self.table.signals()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.table
    }

    pub fn find_signal(&self, full_path: &str) -> Option<&Signal> {
        let idx = self.table.lookup_by_path(full_path)?;
        self.table.signals().get(idx as usize)
    }

    /// The FST format brings its own index, so there is nothing to seek to.
    pub fn get_query_plan(&self, _start_time: u64) -> QueryPlan {
        QueryPlan {
            file_offset: 0,
            snapshot_time: self.t_begin,
            snapshot_index: 0,
        }
    }

    pub fn snapshot_count(&self) -> usize {
        0
    }

    pub fn index_memory_usage(&self) -> usize {
        self.table.size_in_memory()
    }

    // --- query phase ------------------------------------------------------

    pub fn begin_query(
        &mut self,
        t_begin: u64,
        t_end: u64,
        signal_indices: &[SignalIdx],
        pixel_time_step: f32,
    ) {
        let q = &mut self.query;
        q.t_begin = t_begin;
        q.t_end = t_end.max(t_begin);
        q.pixel_time_step = pixel_time_step;
        let count = self.table.signal_count();
        q.signal_indices = signal_indices
            .iter()
            .copied()
            .filter(|&i| (i as usize) < count)
            .collect();
        q.signal_indices.sort_unstable();
        q.signal_indices.dedup();
        q.ran = false;
        q.bufs.clear();
        q.lod.reset(count, pixel_time_step);
    }

    /// The whole window is read in one step; always returns `false`.
    pub fn query_step(&mut self) -> bool {
        if !self.query.ran {
            self.query.ran = true;
            // a read error is tolerated like a truncated VCD: the buffers
            // accumulated so far stay valid
            let _ = self.run_query();
        }
        false
    }

    pub fn flush_query_binary(&mut self) -> QueryResultBinary<'_> {
        self.query_step();
        self.query.bufs.as_binary()
    }

    pub fn cancel_query(&mut self) {
        self.query.ran = true;
    }

    fn run_query(&mut self) -> Result<()> {
        let t_begin = self.query.t_begin;
        let t_end = self.query.t_end;
        let signal_count = self.table.signal_count();

        // handle -> the queried signals it fans out to
        let mut targets: FxHashMap<usize, Vec<SignalIdx>> = FxHashMap::default();
        for &idx in &self.query.signal_indices {
            let signal = &self.table.signals()[idx as usize];
            if let Ok(handle) = signal.id_code.parse::<usize>() {
                targets.entry(handle).or_default().push(idx);
            }
        }
        let handles: Vec<FstSignalHandle> = targets
            .keys()
            .map(|&h| FstSignalHandle::from_index(h))
            .collect();
        let filter = FstFilter::filter_signals(handles);

        // the reader hands out changes for the whole file; everything before
        // the window only updates the value seen at its left edge
        let mut initial: Vec<Option<Vec<u8>>> = vec![None; signal_count];
        let mut events: Vec<(u64, SignalIdx, Vec<u8>)> = Vec::new();
        let callback = |time: u64, handle: FstSignalHandle, value: FstSignalValue| {
            let list = match targets.get(&handle.get_index()) {
                Some(list) => list,
                None => return,
            };
            let bytes: Vec<u8> = match value {
                FstSignalValue::String(value) => value.to_vec(),
                FstSignalValue::Real(value) => format!("{value}").into_bytes(),
            };
            for &idx in list {
                if time < t_begin {
                    initial[idx as usize] = Some(bytes.clone());
                } else if time <= t_end {
                    events.push((time, idx, bytes.clone()));
                }
            }
        };
        // hold the error until everything collected so far has been flushed:
        // a partial read surfaces partial results, like a truncated VCD
        let read_result = self.reader.read_signals(&filter, callback);
        events.sort_by_key(|(time, _, _)| *time);

        let init_time = t_begin.max(self.t_begin);
        let q = &mut self.query;
        let mut current: Vec<Vec<u8>> = vec![b"x".to_vec(); signal_count];
        for &idx in &q.signal_indices {
            let signal = &self.table.signals()[idx as usize];
            let value = initial[idx as usize].take().unwrap_or_else(|| b"x".to_vec());
            match signal.storage {
                SignalStorage::Bit(_) => {
                    let bit = bit_from_bytes(&value);
                    q.lod
                        .emit_initial_1bit(init_time, idx, bit as u8, &mut q.bufs);
                    current[idx as usize] = vec![bit.to_char() as u8];
                }
                SignalStorage::Str(_) => {
                    q.lod
                        .emit_initial_multibit(init_time, idx, &value, &mut q.bufs);
                    current[idx as usize] = value;
                }
            }
        }
        for (time, idx, bytes) in events {
            let signal = &self.table.signals()[idx as usize];
            match signal.storage {
                SignalStorage::Bit(_) => {
                    let new = bit_from_bytes(&bytes);
                    let old = bit_from_bytes(&current[idx as usize]);
                    q.lod
                        .process_1bit(time, idx, new as u8, old as u8, &mut q.bufs);
                    current[idx as usize] = vec![new.to_char() as u8];
                }
                SignalStorage::Str(_) => {
                    let changed = current[idx as usize] != bytes;
                    q.lod.process_multibit(time, idx, &bytes, changed, &mut q.bufs);
                    current[idx as usize] = bytes;
                }
            }
        }
        q.lod.flush_glitches(&mut q.bufs);
        read_result?;
        Ok(())
    }
}

fn bit_from_bytes(value: &[u8]) -> BitValue {
    value
        .last()
        .and_then(|&b| BitValue::from_vcd(b))
        .unwrap_or(BitValue::X)
}

/// Strings and reals always live in the string state, whatever length the
/// FST geometry reports.
fn effective_width(tpe: FstVarType, length: u32) -> u32 {
    match tpe {
        FstVarType::GenericString
        | FstVarType::Real
        | FstVarType::RealTime
        | FstVarType::RealParameter
        | FstVarType::ShortReal => length.max(2),
        _ => length,
    }
}

/// Maps the FST variable kind onto the waveform variable kinds this crate
/// models; everything without a counterpart becomes `Unknown`.
fn var_type_from_fst(tpe: FstVarType) -> VarType {
    use FstVarType as F;
    match tpe {
        F::Wire => VarType::Wire,
        F::Reg => VarType::Reg,
        F::Integer => VarType::Integer,
        F::Real => VarType::Real,
        F::RealTime => VarType::RealTime,
        F::Parameter | F::RealParameter => VarType::Parameter,
        F::Event => VarType::Event,
        F::Supply0 => VarType::Supply0,
        F::Supply1 => VarType::Supply1,
        F::Time => VarType::Time,
        F::Tri => VarType::Tri,
        F::TriAnd => VarType::TriAnd,
        F::TriOr => VarType::TriOr,
        F::TriReg => VarType::TriReg,
        F::Tri0 => VarType::Tri0,
        F::Tri1 => VarType::Tri1,
        F::Wand => VarType::WAnd,
        F::Wor => VarType::WOr,
        F::Logic => VarType::Logic,
        F::Bit => VarType::Bit,
        F::GenericString => VarType::String,
        _ => VarType::Unknown,
    }
}

/// FST stores the timescale as a single power-of-ten exponent. Split it
/// into the nearest unit exponent (a multiple of three at or below it) and
/// the leftover decimal magnitude.
fn timescale_from_exponent(exponent: i8) -> Timescale {
    let exp = (exponent as i32).clamp(-15, 9);
    let unit_exp = exp.min(0).div_euclid(3) * 3;
    let unit = match unit_exp {
        0 => TimescaleUnit::S,
        -3 => TimescaleUnit::Ms,
        -6 => TimescaleUnit::Us,
        -9 => TimescaleUnit::Ns,
        -12 => TimescaleUnit::Ps,
        _ => TimescaleUnit::Fs,
    };
    let magnitude = 10u32.pow((exp - unit_exp) as u32);
    Timescale::new(magnitude, unit)
}
