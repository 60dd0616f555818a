//! Frame spec parsing and shard partitioning tests.

use fix_frames::{FixFramesError, FrameSet};

// ── Parsing ────────────────────────────────────────────────────────

#[test]
fn parse_documented_example() {
    let frames = FrameSet::parse("1,3,5-7,10-12,15").expect("Failed to parse");
    let collected: Vec<u64> = frames.iter().collect();
    assert_eq!(collected, vec![1, 3, 5, 6, 7, 10, 11, 12, 15]);
}

#[test]
fn parse_is_strictly_ascending() {
    let frames = FrameSet::parse("40,2-5,4,39-41,1").expect("Failed to parse");
    let collected: Vec<u64> = frames.iter().collect();
    assert!(collected.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(frames.first(), Some(1));
    assert_eq!(frames.max(), Some(41));
}

#[test]
fn parse_rejects_invalid_specs() {
    for spec in ["0", "5-3", "abc"] {
        match FrameSet::parse(spec) {
            Err(FixFramesError::InvalidSpec { spec: reported, .. }) => assert_eq!(reported, spec),
            other => panic!("Expected InvalidSpec for {spec:?}, got: {other:?}"),
        }
    }
}

#[test]
fn from_str_matches_parse() {
    let parsed: FrameSet = "7,1-2".parse().expect("Failed to parse");
    assert_eq!(parsed, FrameSet::parse("1,2,7").unwrap());
}

#[test]
fn reserialized_spec_reparses_to_same_set() {
    let specs = [
        "1",
        "1,3,5-7,10-12,15",
        "100-90000",
        "5,4,3,2,1",
        "2,4,6,8-9,11",
        "1-3,3-5,5-7",
    ];
    for spec in specs {
        let frames = FrameSet::parse(spec).unwrap();
        let rendered = frames.to_string();
        let reparsed = FrameSet::parse(&rendered).unwrap();
        assert_eq!(reparsed, frames, "{spec:?} rendered as {rendered:?}");
        assert_eq!(reparsed.to_string(), rendered);
    }
}

#[test]
fn generated_sets_round_trip() {
    // Deterministic pseudo-random sets from a small LCG.
    let mut state: u64 = 0x2545_f491;
    for _ in 0..200 {
        let count = 1 + (state % 40) as usize;
        let frames: FrameSet = (0..count)
            .map(|_| {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                1 + (state >> 33) % 120
            })
            .collect();
        let reparsed = FrameSet::parse(&frames.to_string()).unwrap();
        assert_eq!(reparsed, frames);
    }
}

// ── Partitioning ───────────────────────────────────────────────────

#[test]
fn partition_is_a_true_partition() {
    for frame_count in 1..=30_u64 {
        let frames: FrameSet = (1..=frame_count).map(|frame| frame * 3).collect();
        for shard_count in 1..=frame_count as usize {
            let shards = frames.partition(shard_count);
            assert_eq!(shards.len(), shard_count);
            assert!(shards.iter().all(|shard| !shard.is_empty()));

            let mut union: Vec<u64> = shards.iter().flat_map(|shard| shard.iter()).collect();
            let total = union.len();
            union.sort_unstable();
            union.dedup();
            assert_eq!(union.len(), total, "shards overlap");
            assert_eq!(union, frames.iter().collect::<Vec<_>>());

            let largest = shards.iter().map(FrameSet::len).max().unwrap();
            let smallest = shards.iter().map(FrameSet::len).min().unwrap();
            assert!(largest - smallest <= 1);
        }
    }
}

#[test]
fn partition_keeps_shards_contiguous() {
    let frames = FrameSet::parse("1,3,5-7,10-12,15").unwrap();
    let shards: Vec<String> = frames.partition(2).iter().map(ToString::to_string).collect();
    assert_eq!(shards, ["1,3,5-7", "10-12,15"]);
}
