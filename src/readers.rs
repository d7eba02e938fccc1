// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Format detection and the file-driving reader. [`WaveformReader`] owns the
//! file handle and dispatches over the supported formats; the `*_step` entry
//! points bound the work per call so an interactive event loop stays
//! responsive between chunks.

use crate::fst::FstParser;
use crate::hierarchy::{Signal, SignalIdx, SymbolTable, Timescale};
use crate::results::QueryResultBinary;
use crate::snapshot::QueryPlan;
use crate::vcd::{IndexOptions, VcdParser};
use crate::{FileFormat, PegelError, Result};
use std::io::{BufRead, Read, Seek, SeekFrom};

impl From<crate::vcd::VcdError> for PegelError {
    fn from(value: crate::vcd::VcdError) -> Self {
        PegelError::FailedToLoad(FileFormat::Vcd, value.to_string())
    }
}

impl From<crate::fst::FstError> for PegelError {
    fn from(value: crate::fst::FstError) -> Self {
        PegelError::FailedToLoad(FileFormat::Fst, value.to_string())
    }
}

/// Tries to guess the file format used by the input.
pub fn detect_file_format(input: &mut (impl BufRead + Seek)) -> FileFormat {
    let format = if is_vcd(input) {
        FileFormat::Vcd
    } else if fst_reader::is_fst_file(input) {
        FileFormat::Fst
    } else {
        FileFormat::Unknown
    };
    let _ = input.seek(SeekFrom::Start(0));
    format
}

/// A VCD starts with a `$`-directive or goes straight into the data section.
fn is_vcd(input: &mut (impl BufRead + Seek)) -> bool {
    let mut buf = [0u8; 64];
    let n = input.read(&mut buf).unwrap_or(0);
    let _ = input.seek(SeekFrom::Start(0));
    buf[..n]
        .iter()
        .copied()
        .find(|b| !crate::scanner::is_whitespace(*b))
        .map(|b| b == b'$' || b == b'#')
        .unwrap_or(false)
}

/// Convenience for the common native case: map the whole file and index it
/// in one call. The returned parser is open and ready for queries fed by a
/// driver that seeks on its own copy of the file.
pub fn read_vcd_file<P: AsRef<std::path::Path>>(
    filename: P,
    options: IndexOptions,
) -> Result<VcdParser> {
    let file = std::fs::File::open(filename)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let mut parser = VcdParser::with_options(options);
    parser.begin_indexing();
    parser.push_chunk_for_index(&mmap, 0)?;
    parser.finish_indexing()?;
    Ok(parser)
}

enum Backend {
    Vcd {
        parser: VcdParser,
        file: std::fs::File,
        file_len: u64,
        index_pos: u64,
        read_pos: u64,
        indexing_done: bool,
    },
    Fst {
        parser: Box<FstParser<std::io::BufReader<std::fs::File>>>,
    },
}

/// Tagged variant over the supported waveform formats, exposing the shared
/// capability set: metadata accessors, the two-phase indexing/query pipeline
/// and the packed result buffers.
pub struct WaveformReader {
    format: FileFormat,
    backend: Backend,
}

impl WaveformReader {
    pub fn open<P: AsRef<std::path::Path>>(filename: P) -> Result<Self> {
        Self::open_with_options(filename, IndexOptions::default())
    }

    pub fn open_with_options<P: AsRef<std::path::Path>>(
        filename: P,
        options: IndexOptions,
    ) -> Result<Self> {
        let mut probe = std::io::BufReader::new(std::fs::File::open(filename.as_ref())?);
        let format = detect_file_format(&mut probe);
        match format {
            FileFormat::Vcd => {
                let file = std::fs::File::open(filename.as_ref())?;
                let file_len = file.metadata()?.len();
                let mut parser = VcdParser::with_options(options);
                parser.begin_indexing();
                Ok(WaveformReader {
                    format,
                    backend: Backend::Vcd {
                        parser,
                        file,
                        file_len,
                        index_pos: 0,
                        read_pos: 0,
                        indexing_done: false,
                    },
                })
            }
            FileFormat::Fst => {
                let parser = Box::new(FstParser::open_file(filename.as_ref())?);
                Ok(WaveformReader {
                    format,
                    backend: Backend::Fst { parser },
                })
            }
            FileFormat::Unknown => Err(PegelError::UnknownFileFormat),
        }
    }

    pub fn file_format(&self) -> FileFormat {
        self.format
    }

    pub fn file_len(&self) -> u64 {
        match &self.backend {
            Backend::Vcd { file_len, .. } => *file_len,
            Backend::Fst { .. } => 0,
        }
    }

    // --- indexing phase ---------------------------------------------------

    /// Consumes at most `chunk_size` bytes of input and returns how many
    /// were read; 0 means the index is complete (or the call was a no-op).
    /// FST files carry their own index and are complete after `open`.
    pub fn index_step(&mut self, chunk_size: usize) -> Result<usize> {
        match &mut self.backend {
            Backend::Vcd {
                parser,
                file,
                file_len,
                index_pos,
                indexing_done,
                ..
            } => {
                if *indexing_done || chunk_size == 0 {
                    return Ok(0);
                }
                let want = (chunk_size as u64).min(*file_len - *index_pos) as usize;
                if want == 0 {
                    parser.finish_indexing()?;
                    *indexing_done = true;
                    return Ok(0);
                }
                let mut buf = vec![0u8; want];
                file.seek(SeekFrom::Start(*index_pos))?;
                file.read_exact(&mut buf)?;
                parser.push_chunk_for_index(&buf, *index_pos)?;
                *index_pos += want as u64;
                Ok(want)
            }
            Backend::Fst { .. } => Ok(0),
        }
    }

    /// Drives `index_step` to completion.
    pub fn run_indexing(&mut self, chunk_size: usize) -> Result<()> {
        while self.index_step(chunk_size)? > 0 {}
        Ok(())
    }

    // --- metadata ---------------------------------------------------------

    pub fn is_open(&self) -> bool {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.is_open(),
            Backend::Fst { parser } => parser.is_open(),
        }
    }

    pub fn date(&self) -> &str {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.date(),
            Backend::Fst { parser } => parser.date(),
        }
    }

    pub fn version(&self) -> &str {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.version(),
            Backend::Fst { parser } => parser.version(),
        }
    }

    pub fn timescale(&self) -> Timescale {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.timescale(),
            Backend::Fst { parser } => parser.timescale(),
        }
    }

    pub fn time_begin(&self) -> u64 {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.time_begin(),
            Backend::Fst { parser } => parser.time_begin(),
        }
    }

    pub fn time_end(&self) -> u64 {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.time_end(),
            Backend::Fst { parser } => parser.time_end(),
        }
    }

    pub fn signal_count(&self) -> usize {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.signal_count(),
            Backend::Fst { parser } => parser.signal_count(),
        }
    }

    pub fn signals(&self) -> &[Signal] {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.signals(),
            Backend::Fst { parser } => parser.signals(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.symbols(),
            Backend::Fst { parser } => parser.symbols(),
        }
    }

    pub fn find_signal(&self, full_path: &str) -> Option<&Signal> {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.find_signal(full_path),
            Backend::Fst { parser } => parser.find_signal(full_path),
        }
    }

    pub fn snapshot_count(&self) -> usize {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.snapshot_count(),
            Backend::Fst { parser } => parser.snapshot_count(),
        }
    }

    pub fn index_memory_usage(&self) -> usize {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.index_memory_usage(),
            Backend::Fst { parser } => parser.index_memory_usage(),
        }
    }

    // --- query phase ------------------------------------------------------

    pub fn get_query_plan(&self, start_time: u64) -> QueryPlan {
        match &self.backend {
            Backend::Vcd { parser, .. } => parser.get_query_plan(start_time),
            Backend::Fst { parser } => parser.get_query_plan(start_time),
        }
    }

    /// Plans the query, seeks the file and restores the snapshot state.
    /// Returns the plan that was used.
    pub fn begin_query(
        &mut self,
        t_begin: u64,
        t_end: u64,
        signal_indices: &[SignalIdx],
        pixel_time_step: f32,
    ) -> Result<QueryPlan> {
        match &mut self.backend {
            Backend::Vcd {
                parser,
                file,
                read_pos,
                ..
            } => {
                let plan = parser.get_query_plan(t_begin);
                parser.begin_query(
                    t_begin,
                    t_end,
                    signal_indices,
                    plan.snapshot_index,
                    pixel_time_step,
                );
                file.seek(SeekFrom::Start(plan.file_offset))?;
                *read_pos = plan.file_offset;
                Ok(plan)
            }
            Backend::Fst { parser } => {
                parser.begin_query(t_begin, t_end, signal_indices, pixel_time_step);
                Ok(parser.get_query_plan(t_begin))
            }
        }
    }

    /// Feeds the next chunk to the query. Returns `false` once the window is
    /// covered so the caller can stop reading the file.
    pub fn query_step(&mut self, chunk_size: usize) -> Result<bool> {
        match &mut self.backend {
            Backend::Vcd {
                parser,
                file,
                file_len,
                read_pos,
                ..
            } => {
                if chunk_size == 0 {
                    return Ok(true);
                }
                let want = (chunk_size as u64).min(*file_len - *read_pos) as usize;
                if want == 0 {
                    return Ok(false);
                }
                let mut buf = vec![0u8; want];
                file.seek(SeekFrom::Start(*read_pos))?;
                file.read_exact(&mut buf)?;
                *read_pos += want as u64;
                Ok(parser.push_chunk_for_query(&buf))
            }
            Backend::Fst { parser } => Ok(parser.query_step()),
        }
    }

    pub fn flush_query_binary(&mut self) -> QueryResultBinary<'_> {
        match &mut self.backend {
            Backend::Vcd { parser, .. } => parser.flush_query_binary(),
            Backend::Fst { parser } => parser.flush_query_binary(),
        }
    }

    pub fn cancel_query(&mut self) {
        match &mut self.backend {
            Backend::Vcd { parser, .. } => parser.cancel_query(),
            Backend::Fst { parser } => parser.cancel_query(),
        }
    }
}
