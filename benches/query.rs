// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

#[cfg(feature = "benchmark")]
use criterion::{criterion_group, criterion_main, Criterion};
#[cfg(feature = "benchmark")]
use pegel::{IndexOptions, VcdParser};

#[cfg(feature = "benchmark")]
fn make_trace(steps: u64) -> String {
    let mut out = String::from(
        "$timescale 1ns $end\n$scope module top $end\n\
         $var wire 1 ! clk $end\n$var wire 16 c cnt [15:0] $end\n\
         $upscope $end\n$enddefinitions $end\n",
    );
    for step in 0..steps {
        out.push_str(&format!("#{}\n{}!\nb{:016b} c\n", step * 5, step % 2, step % 65536));
    }
    out
}

#[cfg(feature = "benchmark")]
fn criterion_benchmark(c: &mut Criterion) {
    let input = make_trace(20_000);
    let bytes = input.as_bytes();

    c.bench_function("index_20k_steps", |b| {
        b.iter(|| {
            let mut parser = VcdParser::with_options(IndexOptions {
                snapshot_interval: 64 * 1024,
            });
            parser.open_buffer(bytes).unwrap();
            parser.snapshot_count()
        })
    });

    let mut parser = VcdParser::with_options(IndexOptions {
        snapshot_interval: 64 * 1024,
    });
    parser.open_buffer(bytes).unwrap();
    c.bench_function("query_window_with_lod", |b| {
        b.iter(|| {
            let plan = parser.get_query_plan(40_000);
            parser.begin_query(40_000, 60_000, &[0, 1], plan.snapshot_index, 100.0);
            parser.push_chunk_for_query(&bytes[plan.file_offset as usize..]);
            parser.flush_query_binary().transitions_1bit.len()
        })
    });
}

#[cfg(feature = "benchmark")]
criterion_group!(benches, criterion_benchmark);
#[cfg(feature = "benchmark")]
criterion_main!(benches);
