use time::Duration;

use crate::interval::TimeInterval;
use crate::model::{BufferConfig, Slot, WorkingWindow};

/// Generate bookable start-time candidates for one service across a day's
/// working windows.
///
/// The stored (buffer-inclusive) interval steps from each window start by
/// `granularity_min` for as long as it fits inside the window; the advertised
/// slot time is where the service itself starts, `buffer_before` into the
/// stored interval. The stored interval runs from `advertised - before` to
/// `advertised + before + duration + processing + after`, matching what the
/// composer commits, so booking an available slot at its advertised time
/// lands on exactly the candidate interval checked here.
///
/// Taken candidates are emitted with `available = false`; an empty result
/// means the day has no windows at all (closed), which callers must treat
/// differently from "every slot taken".
pub fn slot_candidates(
    windows: &[WorkingWindow],
    duration_min: u32,
    buffers: &BufferConfig,
    committed: &[TimeInterval],
    granularity_min: u32,
) -> Vec<Slot> {
    let step = Duration::minutes(granularity_min.max(1) as i64);
    let total = buffers.before() + buffers.padded(duration_min);
    let lead = buffers.before();

    let mut slots = Vec::new();
    for window in windows {
        let mut actual_start = window.interval.start;
        while actual_start + total <= window.interval.end {
            let candidate = TimeInterval::new(actual_start, actual_start + total);
            let available = !committed.iter().any(|c| c.overlaps(&candidate));
            slots.push(Slot { time: actual_start + lead, available });
            actual_start += step;
        }
    }
    slots
}
