use time::Date;

use crate::interval::{merge_overlapping, subtract_intervals, TimeInterval};
use crate::model::{Absence, AbsenceStatus, Salon, Staff, WorkingWindow};

/// Resolve the open working windows of one salon day.
///
/// Weekday config, exceptional closures, staff hours and approved absences
/// are all folded in here; downstream slot math never re-checks them.
/// "No schedule defined" and "closed" both come back as an empty sequence,
/// neither is an error.
pub fn resolve_windows(
    salon: &Salon,
    staff: Option<&Staff>,
    absences: &[Absence],
    date: Date,
) -> Vec<WorkingWindow> {
    let Some(day) = salon.schedule.day(date.weekday()) else {
        return Vec::new();
    };
    if day.closed || day.windows.is_empty() || salon.is_closed_on(date) {
        return Vec::new();
    }

    let mut windows: Vec<WorkingWindow> = Vec::with_capacity(day.windows.len());
    for (ordinal, w) in day.windows.iter().enumerate() {
        if w.start >= w.end {
            continue;
        }
        let interval = TimeInterval::new(
            date.with_time(w.start).assume_utc(),
            date.with_time(w.end).assume_utc(),
        );
        windows.push(WorkingWindow { interval, ordinal });
    }

    let Some(staff) = staff else {
        return windows;
    };

    // Intersect with the staff member's working range for this weekday.
    let Some(hours) = staff.weekly_hours.day(date.weekday()) else {
        return Vec::new();
    };
    if hours.start >= hours.end {
        return Vec::new();
    }
    let staff_range = TimeInterval::new(
        date.with_time(hours.start).assume_utc(),
        date.with_time(hours.end).assume_utc(),
    );
    windows = windows
        .into_iter()
        .filter_map(|w| {
            w.interval
                .intersect(&staff_range)
                .map(|interval| WorkingWindow { interval, ordinal: w.ordinal })
        })
        .collect();

    // Subtract approved absences; one absence can split a window in two.
    let mut blocked: Vec<TimeInterval> = absences
        .iter()
        .filter(|a| a.staff_id == staff.id && a.status == AbsenceStatus::Approved)
        .map(Absence::interval)
        .collect();
    if blocked.is_empty() {
        return windows;
    }
    blocked.sort_by_key(|iv| iv.start);
    let blocked = merge_overlapping(&blocked);

    let mut result = Vec::with_capacity(windows.len());
    for w in windows {
        for piece in subtract_intervals(&[w.interval], &blocked) {
            result.push(WorkingWindow { interval: piece, ordinal: w.ordinal });
        }
    }
    result
}
