use crate::db::TapeEntry;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const SECS_PER_DAY: i64 = 86_400;

/// Whole days from `from` to `to` (unix seconds), rounded to the nearest day.
pub(crate) fn days_diff(from: i64, to: i64) -> i32 {
    let diff = to - from;
    let days = if diff >= 0 {
        (diff + SECS_PER_DAY / 2) / SECS_PER_DAY
    } else {
        (diff - SECS_PER_DAY / 2) / SECS_PER_DAY
    };
    i32::try_from(days).unwrap_or(if days < 0 { i32::MIN } else { i32::MAX })
}

/// Parse a `YYYYMMDD` or `YYYYMMDDhhmmss` datestamp as UTC.
pub(crate) fn stamp_to_time(stamp: &str) -> Option<DateTime<Utc>> {
    match stamp.len() {
        8 => {
            let date = NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()?;
            Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
        }
        14 => {
            let dt = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok()?;
            Some(Utc.from_utc_datetime(&dt))
        }
        _ => None,
    }
}

/// Read-only view of the tape rotation.
#[derive(Debug, Clone, Default)]
pub(crate) struct TapeList {
    tapes: Vec<TapeEntry>,
    tapecycle: u32,
    runtapes: u32,
}

impl TapeList {
    pub(crate) fn new(tapes: Vec<TapeEntry>, tapecycle: u32, runtapes: u32) -> Self {
        Self { tapes, tapecycle, runtapes: runtapes.max(1) }
    }

    pub(crate) fn lookup(&self, label: &str) -> Option<&TapeEntry> {
        self.tapes.iter().find(|t| t.label == label)
    }

    pub(crate) fn lookup_position(&self, position: u32) -> Option<&TapeEntry> {
        self.tapes.iter().find(|t| t.position == position)
    }

    /// Runs left before the tape `label` is overwritten; 0 means this run.
    pub(crate) fn when_overwrite(&self, label: &str) -> i64 {
        let runtapes = i64::from(self.runtapes);
        let Some(tape) = self.lookup(label) else {
            // Unknown tape.
            return 1;
        };
        if !tape.reuse {
            return 1024;
        }
        let ntapes = self.tapes.len() as i64;
        let position = i64::from(tape.position);
        if ntapes > i64::from(self.tapecycle) {
            (ntapes - position) / runtapes
        } else {
            (i64::from(self.tapecycle) - position) / runtapes
        }
    }

    /// Estimate runs per cycle from how often tapes were written recently.
    pub(crate) fn guess_runs(&self, dumpcycle: u32, today: DateTime<Utc>) -> u32 {
        let dumpcycle = i64::from(dumpcycle);
        let runtapes = i64::from(self.runtapes);
        let mut ntapes: i64 = 0;
        let mut tape_ndays: i64 = 0;

        for pos in 1..self.tapecycle {
            let Some(tape) = self.lookup_position(pos) else {
                break;
            };
            let tape_time = stamp_to_time(&tape.datestamp).map_or(0, |t| t.timestamp());
            tape_ndays = i64::from(days_diff(tape_time, today.timestamp()));
            if tape_ndays < dumpcycle {
                ntapes += 1;
            } else {
                break;
            }
        }

        if tape_ndays < dumpcycle {
            if tape_ndays == 0 {
                ntapes = dumpcycle * runtapes;
            } else {
                ntapes = ntapes * dumpcycle / tape_ndays;
            }
        } else if ntapes == 0 {
            ntapes = dumpcycle * runtapes;
        }

        let runs = (ntapes + runtapes - 1) / runtapes;
        u32::try_from(runs.max(1)).unwrap_or(u32::MAX)
    }
}
