// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Thin command line driver: index a waveform dump, print its hierarchy and
//! statistics, optionally run a time-range query.

use bytesize::ByteSize;
use clap::Parser;
use pegel::{ScopeIdx, SymbolTable, WaveformReader, GLITCH};

#[derive(Parser, Debug)]
#[command(name = "pegel")]
#[command(author = "Kevin Laeufer <laeufer@cornell.edu>")]
#[command(version)]
#[command(about = "Indexes a VCD/FST waveform dump and answers time-range queries.", long_about = None)]
struct Args {
    #[arg(value_name = "WAVEFILE", index = 1)]
    filename: String,
    #[arg(long, default_value_t = 32, help = "streaming chunk size in MiB")]
    chunk_size_mb: u64,
    #[arg(long, help = "start of the query window")]
    t_begin: Option<u64>,
    #[arg(long, help = "end of the query window")]
    t_end: Option<u64>,
    #[arg(
        long,
        default_value_t = -1.0,
        help = "collapse transitions closer than this into glitches, < 0 disables",
        allow_hyphen_values = true
    )]
    pixel_time_step: f32,
    #[arg(value_name = "SIGNAL", index = 2, help = "full signal paths to query")]
    signals: Vec<String>,
}

fn print_scope(symbols: &SymbolTable, scope: ScopeIdx, depth: usize) {
    let node = symbols.scope(scope);
    println!("{:indent$}[scope] {}", "", node.name, indent = depth * 2);
    for &sig in &node.signals {
        let signal = &symbols.signals()[sig as usize];
        println!(
            "{:indent$}[signal] {}  (id={}, width={}, index={})",
            "",
            signal.name,
            signal.id_code,
            signal.width,
            signal.index,
            indent = (depth + 1) * 2
        );
    }
    for &child in &node.children {
        print_scope(symbols, child, depth + 1);
    }
}

fn one_bit_value_str(value: u8) -> &'static str {
    match value {
        0 => "0",
        1 => "1",
        2 => "x",
        3 => "z",
        GLITCH => "GLITCH",
        _ => "?",
    }
}

fn main() {
    let args = Args::parse();
    let chunk_size = (args.chunk_size_mb.max(1) * 1024 * 1024) as usize;

    let mut reader =
        WaveformReader::open(&args.filename).expect("failed to open the waveform file");

    // phase 1: stream the file through the indexer
    let start = std::time::Instant::now();
    let bar = indicatif::ProgressBar::new(reader.file_len());
    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {decimal_bytes} ({percent}%)",
        )
        .unwrap(),
    );
    loop {
        let consumed = reader.index_step(chunk_size).expect("failed to index");
        if consumed == 0 {
            break;
        }
        bar.inc(consumed as u64);
    }
    bar.finish_and_clear();
    let index_duration = start.elapsed();

    if !reader.is_open() {
        eprintln!("failed to parse the header of {}", args.filename);
        std::process::exit(1);
    }

    println!("=== File Info ===");
    println!("File:             {}", args.filename);
    println!("Format:           {:?}", reader.file_format());
    println!("File size:        {}", ByteSize::b(reader.file_len()));
    println!("Index time:       {:?}", index_duration);
    println!("Date:             {}", reader.date());
    println!("Version:          {}", reader.version());
    println!("Timescale:        {}", reader.timescale());
    println!(
        "Time range:       [{}, {}]",
        reader.time_begin(),
        reader.time_end()
    );
    println!("Signal count:     {}", reader.signal_count());
    println!("Snapshot count:   {}", reader.snapshot_count());
    println!(
        "Index mem usage:  {}",
        ByteSize::b(reader.index_memory_usage() as u64)
    );

    println!("\n=== Signal Hierarchy ===");
    let symbols = reader.symbols();
    for &sig in &symbols.root().signals {
        let signal = &symbols.signals()[sig as usize];
        println!(
            "[signal] {}  (id={}, width={}, index={})",
            signal.name, signal.id_code, signal.width, signal.index
        );
    }
    for &child in &symbols.root().children {
        print_scope(symbols, child, 0);
    }

    // phase 2: optional query
    let (t_begin, t_end) = match (args.t_begin, args.t_end) {
        (Some(b), Some(e)) => (b, e),
        _ => return,
    };
    let mut query_ids = Vec::new();
    for path in &args.signals {
        match reader.find_signal(path) {
            Some(signal) => query_ids.push(signal.index),
            None => println!("Warning: signal '{path}' not found."),
        }
    }

    println!("\n=== Query [{t_begin}, {t_end}] ===");
    let start = std::time::Instant::now();
    let plan = reader
        .begin_query(t_begin, t_end, &query_ids, args.pixel_time_step)
        .expect("failed to begin the query");
    println!(
        "Seeking to offset {} (snapshot time {}, index {})...",
        plan.file_offset, plan.snapshot_time, plan.snapshot_index
    );
    let mut bytes_read = 0u64;
    loop {
        if !reader.query_step(chunk_size).expect("failed to read") {
            break;
        }
        bytes_read += chunk_size as u64;
    }
    // signal names survive the borrow of the result buffers
    let names: Vec<String> = reader
        .signals()
        .iter()
        .map(|s| s.full_path.clone())
        .collect();
    let res = reader.flush_query_binary();
    let query_duration = start.elapsed();
    println!("Query time:       {:?}", query_duration);
    println!("Bytes read:       <= {}", ByteSize::b(bytes_read));

    println!("\nResults:");
    println!("  1-bit items: {}", res.transitions_1bit.len());
    for tr in res.transitions_1bit {
        println!(
            "    t={}  {} = {}",
            tr.timestamp,
            names[tr.signal_index as usize],
            one_bit_value_str(tr.value)
        );
    }
    println!("  Multi-bit items: {}", res.transitions_multibit.len());
    for tr in res.transitions_multibit {
        println!(
            "    t={}  {} = {}",
            tr.timestamp,
            names[tr.signal_index as usize],
            res.string(tr)
        );
    }
}
