// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Streaming VCD parser with a two-phase pipeline. During *indexing* the
//! whole file is pushed through once and sparse snapshots are recorded at
//! byte intervals; during a *query* the driver seeks to a snapshot's file
//! offset and feeds chunks until the parser reports that the window has been
//! covered. Memory during indexing grows with the number of snapshots, not
//! with trace activity.

use crate::hierarchy::{
    Signal, SignalIdx, SignalStorage, SymbolTable, Timescale, TimescaleUnit, VarIndex, VarType,
};
use crate::lod::LodFilter;
use crate::results::{QueryBuffers, QueryResultBinary};
use crate::scanner::Scanner;
use crate::snapshot::{QueryPlan, SnapshotIndex};
use crate::state::{BitValue, StateStore};

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum VcdError {
    #[error("[vcd] malformed header: {0}")]
    MalformedHeader(String),
    #[error("[vcd] failed to parse timestamp: `{0}`")]
    MalformedTimestamp(String),
    #[error("[vcd] chunk starts at offset {found}, expected {expected}")]
    NonContiguousChunk { expected: u64, found: u64 },
}

pub type Result<T> = std::result::Result<T, VcdError>;

/// Target byte distance between consecutive snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// Snapshots are recorded whenever at least this many bytes have been
    /// consumed since the previous one. Smaller values trade memory for
    /// faster random queries.
    pub snapshot_interval: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

/// Counters for conditions that are tolerated rather than surfaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub timestamps: u64,
    pub value_changes: u64,
    /// Value changes whose id code is not in the symbol table.
    pub unknown_id_codes: u64,
    /// `$var` entries with an unrecognized type keyword.
    pub unknown_var_types: u64,
    /// Lines that start with no recognized token and were skipped.
    pub skipped_lines: u64,
    /// Queries with a reversed window or an out-of-range snapshot index.
    pub invalid_queries: u64,
    /// Inputs that ended in the middle of a value change.
    pub truncated_inputs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Indexing,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectiveKind {
    Date,
    Version,
    Comment,
    Timescale,
    Scope,
    UpScope,
    Var,
    EndDefinitions,
    Unknown,
}

impl DirectiveKind {
    fn from_keyword(tok: &[u8]) -> Self {
        match tok {
            b"$date" => DirectiveKind::Date,
            b"$version" => DirectiveKind::Version,
            b"$comment" => DirectiveKind::Comment,
            b"$timescale" => DirectiveKind::Timescale,
            b"$scope" => DirectiveKind::Scope,
            b"$upscope" => DirectiveKind::UpScope,
            b"$var" => DirectiveKind::Var,
            b"$enddefinitions" => DirectiveKind::EndDefinitions,
            _ => DirectiveKind::Unknown,
        }
    }
}

/// A header directive whose `$end` has not arrived yet. Directives may span
/// chunk boundaries, so body tokens are accumulated as owned bytes.
#[derive(Debug)]
struct PendingDirective {
    kind: DirectiveKind,
    tokens: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct QueryState {
    t_begin: u64,
    t_end: u64,
    is_queried: Vec<bool>,
    initial_emitted: bool,
    done: bool,
    lod: LodFilter,
    bufs: QueryBuffers,
}

/// One parser instance serves one indexing or query operation at a time.
/// See the crate docs for the driver protocol.
#[derive(Debug)]
pub struct VcdParser {
    opts: IndexOptions,
    phase: Phase,
    section: Section,
    is_open: bool,
    fatal: Option<VcdError>,

    table: SymbolTable,
    state: StateStore,
    snapshots: SnapshotIndex,
    stats: ParseStats,

    date: String,
    version: String,
    comments: Vec<String>,
    timescale: Timescale,
    t_begin: u64,
    t_end: u64,

    current_time: u64,
    seen_first_time: bool,
    last_snapshot_offset: u64,

    /// Bytes after the last processed newline, waiting for the next chunk.
    leftover: Vec<u8>,
    /// Absolute file offset of `leftover[0]`. This is the only place where
    /// file offsets are tracked; the snapshot index depends on it.
    leftover_offset: u64,
    pending: Option<PendingDirective>,
    /// Consuming tokens of an unrecognized `$`-directive until `$end`.
    skip_to_end: bool,

    query: QueryState,
}

impl Default for VcdParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VcdParser {
    pub fn new() -> Self {
        Self::with_options(IndexOptions::default())
    }

    pub fn with_options(opts: IndexOptions) -> Self {
        VcdParser {
            opts,
            phase: Phase::Idle,
            section: Section::Header,
            is_open: false,
            fatal: None,
            table: SymbolTable::new(),
            state: StateStore::empty(),
            snapshots: SnapshotIndex::default(),
            stats: ParseStats::default(),
            date: String::new(),
            version: String::new(),
            comments: Vec::new(),
            timescale: Timescale::default(),
            t_begin: 0,
            t_end: 0,
            current_time: 0,
            seen_first_time: false,
            last_snapshot_offset: 0,
            leftover: Vec::new(),
            leftover_offset: 0,
            pending: None,
            skip_to_end: false,
            query: QueryState::default(),
        }
    }

    // ------------------------------------------------------------------
    // indexing phase
    // ------------------------------------------------------------------

    /// Resets all state and starts a new index. A parser may be reused for a
    /// different trace; nothing from the previous one survives.
    pub fn begin_indexing(&mut self) {
        let opts = self.opts;
        *self = Self::with_options(opts);
        self.phase = Phase::Indexing;
    }

    /// Feeds the next chunk of the trace. `file_offset` is the absolute
    /// offset of `bytes[0]` and must continue the stream. Empty chunks are
    /// no-ops.
    pub fn push_chunk_for_index(&mut self, bytes: &[u8], file_offset: u64) -> Result<()> {
        if self.phase != Phase::Indexing || self.fatal.is_some() || bytes.is_empty() {
            return Ok(());
        }
        let expected = self.leftover_offset + self.leftover.len() as u64;
        if file_offset != expected {
            return Err(VcdError::NonContiguousChunk {
                expected,
                found: file_offset,
            });
        }
        self.leftover.extend_from_slice(bytes);
        // only complete lines are processed; the tail is kept for the next chunk
        match self.leftover.iter().rposition(|&b| b == b'\n') {
            None => Ok(()),
            Some(newline) => self.process_region(newline + 1),
        }
    }

    /// Drains the residual buffer, ensures the final snapshot and freezes
    /// the index. The only user-visible failure path of the indexing phase.
    pub fn finish_indexing(&mut self) -> Result<()> {
        if self.phase != Phase::Indexing {
            return Ok(());
        }
        if self.fatal.is_none() && !self.leftover.is_empty() {
            let end = self.leftover.len();
            let _ = self.process_region(end);
        }
        self.phase = Phase::Idle;
        if let Some(err) = &self.fatal {
            self.is_open = false;
            return Err(err.clone());
        }
        if !self.table.is_sealed() {
            let err = VcdError::MalformedHeader(
                "input ended before $enddefinitions".to_string(),
            );
            self.fatal = Some(err.clone());
            self.is_open = false;
            return Err(err);
        }
        if self.pending.is_some() {
            self.stats.truncated_inputs += 1;
            self.pending = None;
        }
        // every time <= t_end must be covered by a snapshot at or before it
        let end_offset = self.leftover_offset;
        let needs_final = match self.snapshots.last() {
            None => true,
            Some(last) => last.time < self.current_time,
        };
        if needs_final {
            self.snapshots
                .push(self.current_time, end_offset, self.state.image());
        }
        self.is_open = true;
        Ok(())
    }

    /// Convenience for in-memory traces: index the whole buffer in one call.
    pub fn open_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        self.begin_indexing();
        self.push_chunk_for_index(bytes, 0)?;
        self.finish_indexing()
    }

    // ------------------------------------------------------------------
    // metadata
    // ------------------------------------------------------------------

    #[inline]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn timescale(&self) -> Timescale {
        self.timescale
    }

    /// First data timestamp in the trace.
    pub fn time_begin(&self) -> u64 {
        self.t_begin
    }

    /// Last data timestamp in the trace.
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

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn index_memory_usage(&self) -> usize {
        self.snapshots.memory_usage() + self.table.size_in_memory() + self.state.size_in_memory()
    }

    // ------------------------------------------------------------------
    // query phase
    // ------------------------------------------------------------------

    /// Snapshot at or before `start_time`. Pure lookup, no mutation.
    pub fn get_query_plan(&self, start_time: u64) -> QueryPlan {
        self.snapshots.plan(start_time)
    }

    /// Restores the state of the named snapshot and prepares the result
    /// buffers. The driver must seek to the snapshot's `file_offset` before
    /// feeding chunks. Invalid windows and out-of-range snapshot indices are
    /// clamped, not rejected.
    pub fn begin_query(
        &mut self,
        t_begin: u64,
        t_end: u64,
        signal_indices: &[SignalIdx],
        snapshot_index: usize,
        pixel_time_step: f32,
    ) {
        self.phase = Phase::Query;
        self.pending = None;
        self.skip_to_end = false;

        let signal_count = self.table.signal_count();
        let t_end = if t_end < t_begin {
            self.stats.invalid_queries += 1;
            t_begin
        } else {
            t_end
        };

        let q = &mut self.query;
        q.bufs.clear();
        q.lod.reset(signal_count, pixel_time_step);
        q.initial_emitted = false;
        q.done = false;
        q.t_begin = t_begin;
        q.t_end = t_end;
        q.is_queried = vec![false; signal_count];
        for &idx in signal_indices {
            if (idx as usize) < signal_count {
                q.is_queried[idx as usize] = true;
            }
        }

        if !self.is_open || self.snapshots.is_empty() {
            self.query.done = true;
            return;
        }
        let snapshot_index = if snapshot_index >= self.snapshots.len() {
            self.stats.invalid_queries += 1;
            self.snapshots.len() - 1
        } else {
            snapshot_index
        };
        let snap = self.snapshots.get(snapshot_index);
        self.current_time = snap.time;
        self.leftover.clear();
        self.leftover_offset = snap.file_offset;
        self.state.restore(&snap.state);
    }

    /// Feeds query bytes. Returns `false` once the window is covered so the
    /// driver can stop reading.
    pub fn push_chunk_for_query(&mut self, bytes: &[u8]) -> bool {
        if self.phase != Phase::Query || self.query.done {
            return false;
        }
        if bytes.is_empty() {
            return true;
        }
        self.leftover.extend_from_slice(bytes);
        if let Some(newline) = self.leftover.iter().rposition(|&b| b == b'\n') {
            // a malformed timestamp ends the query early, nothing to surface
            let _ = self.process_region(newline + 1);
        }
        !self.query.done
    }

    /// Drains the residual input, guarantees the left-edge emission, closes
    /// open glitches and hands out the result spans. The spans stay valid
    /// until the next `begin_query` or destruction.
    pub fn flush_query_binary(&mut self) -> QueryResultBinary<'_> {
        if self.phase == Phase::Query {
            if !self.query.done && !self.leftover.is_empty() {
                let end = self.leftover.len();
                let _ = self.process_region(end);
            }
            if !self.query.initial_emitted {
                // the window lies past the end of the trace
                self.emit_initial_state();
                self.query.initial_emitted = true;
            }
            let q = &mut self.query;
            q.lod.flush_glitches(&mut q.bufs);
            self.phase = Phase::Idle;
        }
        self.query.bufs.as_binary()
    }

    /// Stops the query; a following `flush_query_binary` returns whatever
    /// has been accumulated.
    pub fn cancel_query(&mut self) {
        if self.phase == Phase::Query {
            self.query.done = true;
        }
    }

    // ------------------------------------------------------------------
    // shared scanning machinery
    // ------------------------------------------------------------------

    /// Processes `leftover[..end]` and drops it from the buffer. The region
    /// is considered consumed even when scanning stops early (query done or
    /// malformed timestamp): replay always restarts from a snapshot offset,
    /// never from the middle of an abandoned region.
    fn process_region(&mut self, end: usize) -> Result<()> {
        let buf = std::mem::take(&mut self.leftover);
        let base = self.leftover_offset;
        let result = self.scan(&buf[..end], base);
        self.leftover = buf;
        self.leftover.drain(..end);
        self.leftover_offset = base + end as u64;
        result
    }

    fn scan(&mut self, buf: &[u8], base: u64) -> Result<()> {
        let mut sc = Scanner::new(buf);
        loop {
            sc.skip_whitespace();
            if sc.eof() {
                return Ok(());
            }
            match self.section {
                Section::Header => {
                    if self.pending.is_none() && sc.peek_non_ws() != Some(b'$') {
                        // data began without $enddefinitions
                        self.seal_header();
                        self.section = Section::Data;
                        continue;
                    }
                    self.header_token(&mut sc);
                }
                Section::Data => {
                    if !self.data_token(&mut sc, base)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // header section
    // ------------------------------------------------------------------

    fn header_token(&mut self, sc: &mut Scanner) {
        let tok = sc.next_token();
        if self.pending.is_none() {
            self.pending = Some(PendingDirective {
                kind: DirectiveKind::from_keyword(tok),
                tokens: Vec::new(),
            });
            return;
        }
        if tok == b"$end" {
            if let Some(directive) = self.pending.take() {
                self.finish_directive(directive);
            }
        } else if let Some(pending) = self.pending.as_mut() {
            pending.tokens.push(tok.to_vec());
        }
    }

    fn finish_directive(&mut self, directive: PendingDirective) {
        match directive.kind {
            DirectiveKind::Date => self.date = join_tokens(&directive.tokens),
            DirectiveKind::Version => self.version = join_tokens(&directive.tokens),
            DirectiveKind::Comment => self.comments.push(join_tokens(&directive.tokens)),
            DirectiveKind::Timescale => self.timescale = parse_timescale(&directive.tokens),
            DirectiveKind::Scope => {
                // kind token first, then the name; the kind is not part of
                // the scope tree model
                let name = directive
                    .tokens
                    .get(1)
                    .map(|t| String::from_utf8_lossy(t).into_owned())
                    .unwrap_or_default();
                self.table.declare_scope(&name);
            }
            DirectiveKind::UpScope => self.table.close_scope(),
            DirectiveKind::Var => self.finish_var(&directive.tokens),
            DirectiveKind::EndDefinitions => {
                self.seal_header();
                self.section = Section::Data;
            }
            DirectiveKind::Unknown => {} // tolerated, consumed through $end
        }
    }

    fn finish_var(&mut self, tokens: &[Vec<u8>]) {
        if tokens.len() < 4 {
            self.stats.skipped_lines += 1;
            return;
        }
        let tpe = match VarType::from_keyword(&tokens[0]) {
            Some(tpe) => tpe,
            None => {
                self.stats.unknown_var_types += 1;
                VarType::Unknown
            }
        };
        let width = ascii_to_u32(&tokens[1]).max(1);
        let id_code = &tokens[2];
        let mut name = String::from_utf8_lossy(&tokens[3]).into_owned();
        // the bit range is either glued to the name or a separate token; a
        // suffix whose length disagrees with the declared width is an array
        // index and stays part of the name
        let mut range_text = String::new();
        for tok in &tokens[4..] {
            range_text.push_str(&String::from_utf8_lossy(tok));
        }
        let glued = range_text.is_empty();
        let bracket = if glued { name.find('[') } else { None };
        if let Some(pos) = bracket {
            range_text = name[pos..].to_string();
        }
        let bit_range = parse_bit_range(&range_text).filter(|r| r.length() == width);
        if bit_range.is_some() {
            if let Some(pos) = bracket {
                name.truncate(pos);
                while name.ends_with(' ') {
                    name.pop();
                }
            }
        }
        self.table
            .declare_signal(&name, id_code, tpe, width, bit_range);
    }

    fn seal_header(&mut self) {
        if !self.table.is_sealed() {
            let (num_1bit, num_multibit) = self.table.seal();
            self.state = StateStore::new(num_1bit, num_multibit);
        }
    }

    // ------------------------------------------------------------------
    // data section
    // ------------------------------------------------------------------

    /// Handles one token of the data section. Returns `false` when scanning
    /// of the current region must stop.
    fn data_token(&mut self, sc: &mut Scanner, base: u64) -> Result<bool> {
        let tok_offset = sc.offset(base);
        let tok = sc.next_token();
        if self.skip_to_end {
            if tok == b"$end" {
                self.skip_to_end = false;
            }
            return Ok(true);
        }
        match tok[0] {
            b'#' => self.handle_timestamp(tok, tok_offset),
            b'$' => {
                match tok {
                    // dump blocks are plain value changes to us; the tokens
                    // that bracket them carry no information of their own
                    b"$dumpvars" | b"$dumpoff" | b"$dumpon" | b"$dumpall" | b"$end" => {}
                    _ => {
                        // $comment and unknown directives: consume until $end
                        if sc.read_until_end().is_none() {
                            self.skip_to_end = true;
                        }
                    }
                }
                Ok(true)
            }
            b'0' | b'1' | b'x' | b'X' | b'z' | b'Z' => {
                if tok.len() >= 2 {
                    self.apply_scalar(tok[0], &tok[1..]);
                } else {
                    self.stats.skipped_lines += 1;
                }
                Ok(true)
            }
            b'b' | b'B' | b'r' | b'R' => {
                let id = sc.next_token();
                if id.is_empty() {
                    // the id code never arrived
                    self.stats.truncated_inputs += 1;
                } else {
                    self.apply_vector(&tok[1..], id);
                }
                Ok(true)
            }
            _ => {
                self.stats.skipped_lines += 1;
                sc.skip_line();
                Ok(true)
            }
        }
    }

    fn handle_timestamp(&mut self, tok: &[u8], tok_offset: u64) -> Result<bool> {
        let new_time = match parse_time(&tok[1..]) {
            Some(t) => t,
            None => {
                let err = VcdError::MalformedTimestamp(String::from_utf8_lossy(tok).into_owned());
                self.fatal = Some(err.clone());
                if self.phase == Phase::Query {
                    self.query.done = true;
                }
                return Err(err);
            }
        };
        self.stats.timestamps += 1;
        match self.phase {
            Phase::Indexing => {
                if !self.seen_first_time {
                    self.seen_first_time = true;
                    self.t_begin = new_time;
                    // the base snapshot: every query time maps to a snapshot
                    // at or before it, so replay can always start here
                    self.snapshots
                        .push(self.current_time, tok_offset, self.state.image());
                    self.last_snapshot_offset = tok_offset;
                } else if tok_offset - self.last_snapshot_offset >= self.opts.snapshot_interval {
                    // the state *before* this line, keyed by the previous
                    // timestamp: replaying from here reaches it again
                    self.snapshots
                        .push(self.current_time, tok_offset, self.state.image());
                    self.last_snapshot_offset = tok_offset;
                }
                self.current_time = new_time;
                if new_time > self.t_end {
                    self.t_end = new_time;
                }
                Ok(true)
            }
            Phase::Query => {
                if !self.query.initial_emitted && new_time >= self.query.t_begin {
                    self.emit_initial_state();
                    self.query.initial_emitted = true;
                }
                self.current_time = new_time;
                if new_time > self.query.t_end {
                    self.query.done = true;
                    return Ok(false);
                }
                Ok(true)
            }
            Phase::Idle => Ok(true),
        }
    }

    /// Synthetic transition at the window's left edge for every queried
    /// signal, so the renderer has a defined value no matter where the scan
    /// started. Pre-timestamp `$dumpvars` fixups surface here at the trace's
    /// first real timestamp, never at 0.
    fn emit_initial_state(&mut self) {
        let time = self.query.t_begin.max(self.t_begin);
        let q = &mut self.query;
        for signal in self.table.signals() {
            if !q.is_queried[signal.index as usize] {
                continue;
            }
            match signal.storage {
                SignalStorage::Bit(bit) => {
                    let value = self.state.get_bit(bit) as u8;
                    q.lod
                        .emit_initial_1bit(time, signal.index, value, &mut q.bufs);
                }
                SignalStorage::Str(slot) => {
                    let value = self.state.get_str(slot).as_bytes();
                    q.lod
                        .emit_initial_multibit(time, signal.index, value, &mut q.bufs);
                }
            }
        }
    }

    /// Single-character value change, e.g. `1!`. Applies to every signal in
    /// the alias group.
    fn apply_scalar(&mut self, value_char: u8, id: &[u8]) {
        let value = match BitValue::from_vcd(value_char) {
            Some(v) => v,
            None => {
                self.stats.skipped_lines += 1;
                return;
            }
        };
        let group = match self.table.alias_group(id) {
            Some(group) => group,
            None => {
                self.stats.unknown_id_codes += 1;
                return;
            }
        };
        self.stats.value_changes += 1;
        let signals = self.table.signals();
        for &idx in group {
            let signal = &signals[idx as usize];
            match signal.storage {
                SignalStorage::Bit(bit) => {
                    let old = self.state.get_bit(bit);
                    self.state.set_bit(bit, value);
                    if self.should_emit(idx) {
                        let q = &mut self.query;
                        q.lod.process_1bit(
                            self.current_time,
                            idx,
                            value as u8,
                            old as u8,
                            &mut q.bufs,
                        );
                    }
                }
                SignalStorage::Str(slot) => {
                    // scalar assignment to a vector signal means every bit
                    // takes that value
                    let token = [value_char];
                    let changed = self.state.get_str(slot).as_bytes() != token.as_slice();
                    self.state.set_str(slot, &token);
                    if self.should_emit(idx) {
                        let q = &mut self.query;
                        q.lod
                            .process_multibit(self.current_time, idx, &token, changed, &mut q.bufs);
                    }
                }
            }
        }
    }

    /// Vector (`b…`/`B…`) or real (`r…`/`R…`) value change. The prefix
    /// letter is stripped; the value token is stored as written.
    fn apply_vector(&mut self, value: &[u8], id: &[u8]) {
        if value.is_empty() {
            self.stats.skipped_lines += 1;
            return;
        }
        let group = match self.table.alias_group(id) {
            Some(group) => group,
            None => {
                self.stats.unknown_id_codes += 1;
                return;
            }
        };
        self.stats.value_changes += 1;
        let signals = self.table.signals();
        for &idx in group {
            let signal = &signals[idx as usize];
            match signal.storage {
                SignalStorage::Str(slot) => {
                    let changed = self.state.get_str(slot).as_bytes() != value;
                    self.state.set_str(slot, value);
                    if self.should_emit(idx) {
                        let q = &mut self.query;
                        q.lod
                            .process_multibit(self.current_time, idx, value, changed, &mut q.bufs);
                    }
                }
                SignalStorage::Bit(bit) => {
                    // a bit-string applied to a 1-bit signal carries the
                    // value in its last character
                    let last = value.last().copied().unwrap_or(b'x');
                    let new = BitValue::from_vcd(last).unwrap_or(BitValue::X);
                    let old = self.state.get_bit(bit);
                    self.state.set_bit(bit, new);
                    if self.should_emit(idx) {
                        let q = &mut self.query;
                        q.lod.process_1bit(
                            self.current_time,
                            idx,
                            new as u8,
                            old as u8,
                            &mut q.bufs,
                        );
                    }
                }
            }
        }
    }

    #[inline]
    fn should_emit(&self, signal: SignalIdx) -> bool {
        self.phase == Phase::Query
            && self.query.initial_emitted
            && self.query.is_queried[signal as usize]
    }
}

fn join_tokens(tokens: &[Vec<u8>]) -> String {
    let mut out = String::new();
    for (ii, tok) in tokens.iter().enumerate() {
        if ii > 0 {
            out.push(' ');
        }
        out.push_str(&String::from_utf8_lossy(tok));
    }
    out
}

fn ascii_to_u32(digits: &[u8]) -> u32 {
    let mut out = 0u32;
    for &b in digits {
        if b.is_ascii_digit() {
            out = out.saturating_mul(10).saturating_add((b - b'0') as u32);
        }
    }
    out
}

/// `$timescale` bodies come as `1ns`, `1 ns` or even split across lines:
/// concatenate, then split into magnitude digits and unit suffix.
fn parse_timescale(tokens: &[Vec<u8>]) -> Timescale {
    let combined: Vec<u8> = tokens.iter().flat_map(|t| t.iter().copied()).collect();
    let digits_end = combined
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(combined.len());
    let magnitude = if digits_end == 0 {
        1
    } else {
        ascii_to_u32(&combined[..digits_end]).max(1)
    };
    let unit = TimescaleUnit::from_suffix(&combined[digits_end..]);
    Timescale::new(magnitude, unit)
}

/// Bit range suffix of a `$var`: `[msb:lsb]` or `[bit]`.
fn parse_bit_range(text: &str) -> Option<VarIndex> {
    let open = text.find('[')?;
    let close = text.find(']')?;
    if close <= open + 1 {
        return None;
    }
    let inner = &text[open + 1..close];
    match inner.split_once(':') {
        Some((msb, lsb)) => {
            let msb = msb.trim().parse::<i64>().ok()?;
            let lsb = lsb.trim().parse::<i64>().ok()?;
            Some(VarIndex::new(msb, lsb))
        }
        None => {
            let bit = inner.trim().parse::<i64>().ok()?;
            Some(VarIndex::new(bit, bit))
        }
    }
}

fn parse_time(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    match text.parse::<u64>() {
        Ok(value) => Some(value),
        // some simulators emit float timestamps with a zero fraction
        Err(_) => match text.parse::<f64>() {
            Ok(value) if value.fract() == 0.0 && value >= 0.0 => Some(value as u64),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timescale() {
        let ts = parse_timescale(&[b"1ns".to_vec()]);
        assert_eq!(ts, Timescale::new(1, TimescaleUnit::Ns));
        let ts = parse_timescale(&[b"10".to_vec(), b"ps".to_vec()]);
        assert_eq!(ts, Timescale::new(10, TimescaleUnit::Ps));
        let ts = parse_timescale(&[b"100us".to_vec()]);
        assert_eq!(ts, Timescale::new(100, TimescaleUnit::Us));
        let ts = parse_timescale(&[b"banana".to_vec()]);
        assert_eq!(ts, Timescale::new(1, TimescaleUnit::Unknown));
    }

    #[test]
    fn test_parse_bit_range() {
        assert_eq!(parse_bit_range("[7:0]"), Some(VarIndex::new(7, 0)));
        assert_eq!(parse_bit_range("[3]"), Some(VarIndex::new(3, 3)));
        assert_eq!(parse_bit_range("[1:-1]"), Some(VarIndex::new(1, -1)));
        assert_eq!(parse_bit_range(""), None);
        assert_eq!(parse_bit_range("[]"), None);
        assert_eq!(parse_bit_range("[a:b]"), None);
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time(b"0"), Some(0));
        assert_eq!(parse_time(b"1234567890123"), Some(1234567890123));
        assert_eq!(parse_time(b"25.0"), Some(25));
        assert_eq!(parse_time(b"25.5"), None);
        assert_eq!(parse_time(b""), None);
        assert_eq!(parse_time(b"abc"), None);
    }

    /// Header directives survive arbitrary chunk boundaries.
    #[test]
    fn test_header_split_across_chunks() {
        let input = b"$date\n  today\n$end\n$timescale\n  1ns\n$end\n$scope module top $end\n$var wire 8 ! data [7:0] $end\n$upscope $end\n$enddefinitions $end\n";
        for split in 1..input.len() - 1 {
            let mut parser = VcdParser::new();
            parser.begin_indexing();
            parser.push_chunk_for_index(&input[..split], 0).unwrap();
            parser
                .push_chunk_for_index(&input[split..], split as u64)
                .unwrap();
            parser.finish_indexing().unwrap();
            assert!(parser.is_open(), "split at {split}");
            assert_eq!(parser.date(), "today");
            assert_eq!(parser.timescale(), Timescale::new(1, TimescaleUnit::Ns));
            assert_eq!(parser.signal_count(), 1);
            let sig = &parser.signals()[0];
            assert_eq!(sig.full_path, "top.data");
            assert_eq!(sig.width, 8);
            assert_eq!(sig.bit_range, Some(VarIndex::new(7, 0)));
        }
    }

    #[test]
    fn test_non_contiguous_chunk_is_rejected() {
        let mut parser = VcdParser::new();
        parser.begin_indexing();
        parser.push_chunk_for_index(b"$enddefinitions $end\n", 0).unwrap();
        let err = parser.push_chunk_for_index(b"#0\n", 100).unwrap_err();
        assert!(matches!(err, VcdError::NonContiguousChunk { .. }));
    }
}
