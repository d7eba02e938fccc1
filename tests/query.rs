// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Snapshot replay, chunk-boundary robustness and query-window edge cases.

use pegel::*;

/// A clock plus an 8-bit counter, one value change block every 10 time units.
fn make_trace(steps: u64) -> String {
    let mut out = String::from(
        "$timescale 1ns $end\n\
         $scope module top $end\n\
         $var wire 1 ! clk $end\n\
         $var wire 8 c cnt [7:0] $end\n\
         $upscope $end\n\
         $enddefinitions $end\n",
    );
    for step in 0..steps {
        out.push_str(&format!("#{}\n", step * 10));
        out.push_str(&format!("{}!\n", step % 2));
        out.push_str(&format!("b{:08b} c\n", step % 256));
    }
    out
}

fn small_snapshots() -> IndexOptions {
    IndexOptions {
        snapshot_interval: 512,
    }
}

#[allow(clippy::type_complexity)]
fn collect(res: &QueryResultBinary) -> (Vec<Transition1Bit>, Vec<TransitionMultiBit>, Vec<u8>) {
    (
        res.transitions_1bit.to_vec(),
        res.transitions_multibit.to_vec(),
        res.string_pool.to_vec(),
    )
}

/// Replaying from a mid-file snapshot must produce byte-identical buffers to
/// replaying from the start of the data section.
#[test]
fn test_snapshot_replay_equivalence() {
    let input = make_trace(500);
    let mut parser = VcdParser::with_options(small_snapshots());
    parser.open_buffer(input.as_bytes()).unwrap();
    assert!(parser.snapshot_count() >= 4, "trace too small for the test");

    let (t_begin, t_end) = (2501, 3999);
    let plan = parser.get_query_plan(t_begin);
    assert!(plan.snapshot_index > 0, "expected a mid-file snapshot");
    assert!(plan.snapshot_time <= t_begin);

    parser.begin_query(t_begin, t_end, &[0, 1], plan.snapshot_index, -1.0);
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let from_snapshot = collect(&parser.flush_query_binary());

    let base = parser.get_query_plan(0);
    assert_eq!(base.snapshot_index, 0);
    parser.begin_query(t_begin, t_end, &[0, 1], 0, -1.0);
    parser.push_chunk_for_query(&input.as_bytes()[base.file_offset as usize..]);
    let from_start = collect(&parser.flush_query_binary());

    assert_eq!(from_snapshot, from_start);
    assert!(!from_snapshot.0.is_empty());
    assert!(!from_snapshot.1.is_empty());
}

/// Snapshots are monotonic in time and file offset (observed through plans).
#[test]
fn test_plan_monotonicity() {
    let input = make_trace(500);
    let mut parser = VcdParser::with_options(small_snapshots());
    parser.open_buffer(input.as_bytes()).unwrap();

    let mut last = parser.get_query_plan(0);
    for t in (0..5000).step_by(50) {
        let plan = parser.get_query_plan(t);
        assert!(plan.snapshot_time <= t || plan.snapshot_index == 0);
        assert!(plan.snapshot_time >= last.snapshot_time);
        assert!(plan.file_offset >= last.file_offset);
        last = plan;
    }
}

/// Feeding the index byte by byte must not change anything: the leftover
/// buffer absorbs every chunk boundary.
#[test]
fn test_chunked_indexing_matches_single_push() {
    let input = make_trace(50);
    let bytes = input.as_bytes();

    let mut whole = VcdParser::new();
    whole.open_buffer(bytes).unwrap();

    let mut chunked = VcdParser::new();
    chunked.begin_indexing();
    for (offset, byte) in bytes.iter().enumerate() {
        chunked
            .push_chunk_for_index(std::slice::from_ref(byte), offset as u64)
            .unwrap();
    }
    chunked.finish_indexing().unwrap();

    assert_eq!(whole.time_begin(), chunked.time_begin());
    assert_eq!(whole.time_end(), chunked.time_end());
    assert_eq!(whole.signal_count(), chunked.signal_count());
    assert_eq!(whole.snapshot_count(), chunked.snapshot_count());
    assert_eq!(whole.stats(), chunked.stats());

    // and the query results match as well, fed in awkward 7-byte chunks
    let plan = whole.get_query_plan(0);
    whole.begin_query(0, 490, &[0, 1], plan.snapshot_index, -1.0);
    whole.push_chunk_for_query(&bytes[plan.file_offset as usize..]);
    let expected = collect(&whole.flush_query_binary());

    let plan = chunked.get_query_plan(0);
    chunked.begin_query(0, 490, &[0, 1], plan.snapshot_index, -1.0);
    for chunk in bytes[plan.file_offset as usize..].chunks(7) {
        if !chunked.push_chunk_for_query(chunk) {
            break;
        }
    }
    let actual = collect(&chunked.flush_query_binary());
    assert_eq!(expected, actual);
}

/// Once the window is covered the parser asks the driver to stop.
#[test]
fn test_query_early_stop() {
    let input = make_trace(500);
    let bytes = input.as_bytes();
    let mut parser = VcdParser::with_options(small_snapshots());
    parser.open_buffer(bytes).unwrap();

    let plan = parser.get_query_plan(0);
    parser.begin_query(0, 50, &[0], plan.snapshot_index, -1.0);
    let mut fed = 0usize;
    let mut stopped = false;
    for chunk in bytes[plan.file_offset as usize..].chunks(64) {
        fed += chunk.len();
        if !parser.push_chunk_for_query(chunk) {
            stopped = true;
            break;
        }
    }
    assert!(stopped, "the parser never reported completion");
    assert!(fed < bytes.len() / 2, "early stop read too much");

    let res = parser.flush_query_binary();
    assert!(res.transitions_1bit.iter().all(|t| t.timestamp <= 50));
    assert_eq!(res.transitions_1bit[0].timestamp, 0);
}

/// `begin_indexing` on a used parser leaves no residue of the previous file.
#[test]
fn test_reopen_resets_everything() {
    let first = make_trace(100);
    let mut parser = VcdParser::with_options(small_snapshots());
    parser.open_buffer(first.as_bytes()).unwrap();
    assert_eq!(parser.signal_count(), 2);
    assert!(parser.snapshot_count() > 1);

    let second = "$scope module other $end $var wire 1 z lone $end $upscope $end\n\
                  $enddefinitions $end\n#0 1z\n#7 0z\n";
    parser.open_buffer(second.as_bytes()).unwrap();
    assert_eq!(parser.signal_count(), 1);
    assert_eq!(parser.signals()[0].full_path, "other.lone");
    assert_eq!(parser.time_end(), 7);
    assert!(parser.find_signal("top.clk").is_none());
    assert_eq!(parser.stats().timestamps, 2);

    let plan = parser.get_query_plan(0);
    parser.begin_query(0, 7, &[0], plan.snapshot_index, -1.0);
    parser.push_chunk_for_query(&second.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    let bits: Vec<(u64, u8)> = res
        .transitions_1bit
        .iter()
        .map(|t| (t.timestamp, t.value))
        .collect();
    assert_eq!(bits, vec![(0, 1), (7, 0)]);
}

/// A window past the end of the trace still yields the left-edge emission,
/// carrying the final state.
#[test]
fn test_window_past_end_of_trace() {
    let input = make_trace(10); // timestamps 0..90
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();

    let plan = parser.get_query_plan(200);
    parser.begin_query(200, 300, &[0, 1], plan.snapshot_index, -1.0);
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    let bits: Vec<(u64, u32, u8)> = res
        .transitions_1bit
        .iter()
        .map(|t| (t.timestamp, t.signal_index, t.value))
        .collect();
    // final clk value: step 9 -> 1
    assert_eq!(bits, vec![(200, 0, 1)]);
    assert_eq!(res.transitions_multibit.len(), 1);
    assert_eq!(res.transitions_multibit[0].timestamp, 200);
    assert_eq!(res.string(&res.transitions_multibit[0]), "00001001");
}

/// Reversed windows are clamped to an empty window at `t_begin`.
#[test]
fn test_invalid_window_is_clamped() {
    let input = make_trace(10);
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();

    let plan = parser.get_query_plan(25);
    parser.begin_query(25, 5, &[0], plan.snapshot_index, -1.0);
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    let bits: Vec<(u64, u8)> = res
        .transitions_1bit
        .iter()
        .map(|t| (t.timestamp, t.value))
        .collect();
    // only the left edge: clk value after #20 is 0
    assert_eq!(bits, vec![(25, 0)]);
    assert_eq!(parser.stats().invalid_queries, 1);
}

#[test]
fn test_out_of_range_snapshot_is_clamped() {
    let input = make_trace(10);
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();

    let last = parser.get_query_plan(u64::MAX);
    parser.begin_query(last.snapshot_time, 1000, &[0], 9999, -1.0);
    parser.push_chunk_for_query(&input.as_bytes()[last.file_offset as usize..]);
    let res = parser.flush_query_binary();
    assert!(!res.transitions_1bit.is_empty());
    assert_eq!(parser.stats().invalid_queries, 1);
}

/// Value changes dumped before the first timestamp surface at the trace's
/// first real timestamp, never at time 0.
#[test]
fn test_dumpvars_before_first_timestamp() {
    let input = "$scope module top $end\n\
                 $var wire 1 ! clk $end\n\
                 $var wire 4 c cnt [3:0] $end\n\
                 $upscope $end $enddefinitions $end\n\
                 $dumpvars\n1!\nb1010 c\n$end\n\
                 #100\n0!\n#200\n1!\n";
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();
    assert_eq!(parser.time_begin(), 100);

    let plan = parser.get_query_plan(0);
    parser.begin_query(0, 200, &[0, 1], plan.snapshot_index, -1.0);
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    let bits: Vec<(u64, u32, u8)> = res
        .transitions_1bit
        .iter()
        .map(|t| (t.timestamp, t.signal_index, t.value))
        .collect();
    // the left edge lands at max(t_begin, first data time) = 100, where the
    // dumped 1 has already been overwritten by the change at #100
    assert_eq!(bits, vec![(100, 0, 0), (200, 0, 1)]);
    let vectors: Vec<(u64, String)> = res
        .transitions_multibit
        .iter()
        .map(|t| (t.timestamp, res.string(t).to_string()))
        .collect();
    assert_eq!(vectors, vec![(100, "1010".to_string())]);
}

#[test]
fn test_mid_window_left_edge() {
    let input = make_trace(10);
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();

    // 45 falls between #40 (clk=0) and #50 (clk=1)
    let plan = parser.get_query_plan(45);
    parser.begin_query(45, 70, &[0], plan.snapshot_index, -1.0);
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    let bits: Vec<(u64, u8)> = res
        .transitions_1bit
        .iter()
        .map(|t| (t.timestamp, t.value))
        .collect();
    assert_eq!(bits, vec![(45, 0), (50, 1), (60, 0), (70, 1)]);
}

#[test]
fn test_empty_subset_and_zero_chunks() {
    let input = make_trace(10);
    let mut parser = VcdParser::new();
    parser.begin_indexing();
    parser.push_chunk_for_index(&[], 0).unwrap(); // no-op
    parser.push_chunk_for_index(input.as_bytes(), 0).unwrap();
    parser.finish_indexing().unwrap();

    let plan = parser.get_query_plan(0);
    parser.begin_query(0, 90, &[], plan.snapshot_index, -1.0);
    assert!(parser.push_chunk_for_query(&[])); // no-op, not done yet
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    assert!(res.is_empty());
}

#[test]
fn test_cancel_query_keeps_accumulated_results() {
    let input = make_trace(100);
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();

    let plan = parser.get_query_plan(0);
    parser.begin_query(0, 990, &[0], plan.snapshot_index, -1.0);
    // feed some of the trace, then cancel
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..300]);
    parser.cancel_query();
    assert!(!parser.push_chunk_for_query(b"#990\n1!\n"));
    let res = parser.flush_query_binary();
    assert!(!res.transitions_1bit.is_empty());
    assert!(res.transitions_1bit.iter().all(|t| t.timestamp < 990));
}
