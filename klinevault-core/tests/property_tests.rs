//! Property tests for downsampling and period ordering.
//!
//! Uses proptest to verify:
//! 1. Downsample determinism: exactly floor(N / interval) rows are kept,
//!    at 1-indexed positions interval, 2*interval, ...
//! 2. Intervals 0 and 1 keep every row
//! 3. Shard file names sort in the same order as their periods

use klinevault_core::{should_keep, ArchiveTask, Downsampler, Granularity, Period};
use proptest::prelude::*;

// ── 1. Downsample determinism ────────────────────────────────────────

proptest! {
    #[test]
    fn keeps_floor_n_over_interval_at_multiples(interval in 1u32..50, n in 0usize..2_000) {
        let mut counter = 0;
        let kept: Vec<usize> = (1..=n)
            .filter(|_| should_keep(&mut counter, interval))
            .collect();

        prop_assert_eq!(kept.len(), n / interval as usize);
        for (i, pos) in kept.iter().enumerate() {
            prop_assert_eq!(*pos, (i + 1) * interval as usize);
        }
    }
}

// ── 2. Degenerate intervals ──────────────────────────────────────────

proptest! {
    #[test]
    fn small_intervals_keep_everything(interval in 0u32..=1, n in 0usize..500) {
        let mut ds = Downsampler::new(interval);
        let kept = (0..n).filter(|_| ds.keep()).count();
        prop_assert_eq!(kept, n);
    }
}

// ── 3. Name order equals chronological order ─────────────────────────

fn arb_period() -> impl Strategy<Value = Period> {
    (2017i32..2040, 1u32..=12).prop_map(|(y, m)| Period::new(y, m).unwrap())
}

proptest! {
    #[test]
    fn shard_names_sort_chronologically(a in arb_period(), b in arb_period()) {
        let name = |p: Period| {
            ArchiveTask::new("BTC", "USDT", Granularity::OneSecond, p).shard_file_name()
        };
        prop_assert_eq!(a.cmp(&b), name(a).cmp(&name(b)));
    }
}
