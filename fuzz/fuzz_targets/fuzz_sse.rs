#![no_main]

//! Fuzz target for SSE reassembly.
//!
//! # Goal
//! Verify that the event-stream parser does not:
//! - Panic on arbitrary bytes or chunk boundaries
//! - Buffer more than its configured limit
//! - Produce different frames depending on how the body is chunked

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use mcpbridge_core::jsonrpc::JsonRpcMessage;
use mcpbridge_core::transport::sse::SseParser;

/// Fuzz input for SSE testing
#[derive(Arbitrary, Debug)]
struct FuzzSseInput {
    /// Raw stream body
    body: Vec<u8>,
    /// Split points, as offsets into `body`
    splits: Vec<u16>,
    /// Parser limit (kept small so the limit paths are reachable)
    limit: u16,
}

fuzz_target!(|input: FuzzSseInput| {
    fuzz_sse(input);
});

fn fuzz_sse(input: FuzzSseInput) {
    let limit = usize::from(input.limit).max(1);

    let whole = parse(&input.body, &[input.body.len()], limit);

    let mut cuts: Vec<usize> = input
        .splits
        .iter()
        .map(|&s| usize::from(s).min(input.body.len()))
        .collect();
    cuts.push(input.body.len());
    cuts.sort_unstable();
    let chunked = parse(&input.body, &cuts, limit);

    // Chunk boundaries never change the outcome, oversized events included.
    assert_eq!(whole, chunked);

    for frame in &whole {
        assert!(frame.len() <= limit);
        let _ = JsonRpcMessage::from_slice(frame);
    }
}

fn parse(body: &[u8], cuts: &[usize], limit: usize) -> Vec<Vec<u8>> {
    let mut parser = SseParser::new(limit);
    let mut frames = Vec::new();
    let mut start = 0;
    for &end in cuts {
        if end < start {
            continue;
        }
        frames.extend(parser.feed(&body[start..end]));
        start = end;
    }
    frames.extend(parser.finish());
    frames
}
