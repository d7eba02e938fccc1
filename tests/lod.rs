// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Glitch collapsing through the full parse-and-query pipeline.

use pegel::*;

const ONE_BIT_HEADER: &str = "$scope module top $end $var wire 1 ! clk $end $upscope $end\n\
                              $enddefinitions $end\n";
const BUS_HEADER: &str = "$scope module top $end $var wire 4 c bus [3:0] $end $upscope $end\n\
                          $enddefinitions $end\n";

fn query_bits(input: &str, t_end: u64, pixel_time_step: f32) -> Vec<(u64, u8)> {
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();
    let plan = parser.get_query_plan(0);
    parser.begin_query(0, t_end, &[0], plan.snapshot_index, pixel_time_step);
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    res.transitions_1bit
        .iter()
        .map(|t| (t.timestamp, t.value))
        .collect()
}

fn query_strings(input: &str, t_end: u64, pixel_time_step: f32) -> Vec<(u64, String)> {
    let mut parser = VcdParser::new();
    parser.open_buffer(input.as_bytes()).unwrap();
    let plan = parser.get_query_plan(0);
    parser.begin_query(0, t_end, &[0], plan.snapshot_index, pixel_time_step);
    parser.push_chunk_for_query(&input.as_bytes()[plan.file_offset as usize..]);
    let res = parser.flush_query_binary();
    res.transitions_multibit
        .iter()
        .map(|t| (t.timestamp, res.string(t).to_string()))
        .collect()
}

#[test]
fn test_glitch_collapsing() {
    let input = format!(
        "{ONE_BIT_HEADER}#0 0!  #5 1!  #8 0!  #12 1!  #500 0!\n"
    );
    let bits = query_bits(&input, 1000, 100.0);
    // the burst at 5/8/12 collapses: the first emitted change becomes the
    // marker, the closure restores the actual value at the last change
    assert_eq!(bits, vec![(0, 0), (5, GLITCH), (12, 1), (500, 0)]);
}

#[test]
fn test_no_collapsing_when_disabled() {
    let input = format!(
        "{ONE_BIT_HEADER}#0 0!  #5 1!  #8 0!  #12 1!  #500 0!\n"
    );
    let bits = query_bits(&input, 1000, -1.0);
    assert_eq!(bits, vec![(0, 0), (5, 1), (8, 0), (12, 1), (500, 0)]);
}

#[test]
fn test_trace_ending_inside_a_burst() {
    let input = format!("{ONE_BIT_HEADER}#0 0!  #5 1!  #8 0!  #12 1!\n");
    let bits = query_bits(&input, 1000, 100.0);
    // flush closes the open glitch with the actual current value
    assert_eq!(bits, vec![(0, 0), (5, GLITCH), (12, 1)]);
}

#[test]
fn test_dense_clock_is_bounded() {
    let mut input = String::from(ONE_BIT_HEADER);
    for t in 0..=1000u64 {
        input.push_str(&format!("#{t} {}!\n", t % 2));
    }
    let bits = query_bits(&input, 2000, 50.0);
    // a thousand transitions collapse into edge, marker and closure
    assert_eq!(bits.len(), 3);
    assert_eq!(bits[0], (0, 0));
    assert_eq!(bits[1], (1, GLITCH));
    assert_eq!(bits[2], (1000, 0));
    // the LOD bound: emitted neighbors closer than the pixel step involve a
    // glitch marker
    for pair in bits.windows(2) {
        let close = pair[1].0 - pair[0].0 < 50;
        assert!(!close || pair[0].1 == GLITCH || pair[1].1 == GLITCH);
    }
}

#[test]
fn test_multibit_glitch_marker_and_closure() {
    let input = format!(
        "{BUS_HEADER}#0 b0000 c\n#5 b0001 c\n#8 b0010 c\n#12 b0011 c\n#500 b0100 c\n"
    );
    let strings = query_strings(&input, 1000, 100.0);
    assert_eq!(
        strings,
        vec![
            (0, "0000".to_string()),
            (5, "0001".to_string()),
            (5, "GLITCH".to_string()),
            (12, "0011".to_string()),
            (500, "0100".to_string()),
        ]
    );
}

#[test]
fn test_multibit_burst_without_net_change() {
    // the burst returns to the pre-burst value; the closure still reports
    // the actual value at the last change
    let input = format!(
        "{BUS_HEADER}#0 b0000 c\n#100 b0001 c\n#103 b0000 c\n#500 b1000 c\n"
    );
    let strings = query_strings(&input, 1000, 50.0);
    assert_eq!(
        strings,
        vec![
            (0, "0000".to_string()),
            (100, "0001".to_string()),
            (100, "GLITCH".to_string()),
            (103, "0000".to_string()),
            (500, "1000".to_string()),
        ]
    );
}

#[test]
fn test_same_timestamp_beats_glitch_detection() {
    // two changes at one timestamp only patch the emitted value in place
    let input = format!("{ONE_BIT_HEADER}#0 0!\n#50 1! 0! 1!\n#200 0!\n");
    let bits = query_bits(&input, 1000, 10.0);
    assert_eq!(bits, vec![(0, 0), (50, 1), (200, 0)]);
}
