use crate::db::HistoryRecord;

/// Full size guessed for a disk with no history, in KB.
const NEW_DISK_GUESS: u64 = 1_000_000;

/// A size computed on the server from dump history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ServerEstimate {
    pub size: u64,
    /// No history backed the number.
    pub guessed: bool,
}

impl ServerEstimate {
    const fn measured(size: u64) -> Self {
        Self { size, guessed: false }
    }

    const fn guess(size: u64) -> Self {
        Self { size, guessed: true }
    }
}

fn mean(sizes: &[u64]) -> Option<u64> {
    if sizes.is_empty() {
        None
    } else {
        Some(sizes.iter().sum::<u64>() / sizes.len() as u64)
    }
}

/// Estimate the native size of a level-`level` dump without asking the client.
pub(crate) fn server_estimate(
    info: &HistoryRecord,
    level: u32,
    last_level: Option<u32>,
    tape_length: u64,
) -> ServerEstimate {
    if level == 0 {
        if let Some(entry) = info.history.iter().rev().find(|e| e.level == 0) {
            return ServerEstimate::measured(entry.size);
        }
        let recorded = info.level_size(0);
        if recorded > 1000 {
            return ServerEstimate::measured(recorded);
        }
        return ServerEstimate::guess(NEW_DISK_GUESS.min(tape_length / 2));
    }

    if last_level == Some(level) {
        let sizes: Vec<u64> =
            info.history.iter().filter(|e| e.level == level).map(|e| e.size).collect();
        if let Some(avg) = mean(&sizes) {
            return ServerEstimate::measured(avg);
        }
        let recorded = info.level_size(level);
        if recorded > 0 {
            return ServerEstimate::measured(recorded);
        }
        let full = server_estimate(info, 0, last_level, tape_length);
        return ServerEstimate::guess(full.size / 10);
    }

    // First night at a new level: only first-day sizes are representative.
    let first_days: Vec<u64> = info
        .history
        .iter()
        .enumerate()
        .filter(|(i, e)| e.level == level && (*i == 0 || info.history[i - 1].level != level))
        .map(|(_, e)| e.size)
        .collect();
    if let Some(avg) = mean(&first_days) {
        return ServerEstimate::measured(avg);
    }
    let recorded = info.level_size(level);
    if recorded > 0 {
        return ServerEstimate::measured(recorded);
    }
    let below = server_estimate(info, level - 1, Some(level - 1), tape_length);
    ServerEstimate::guess(below.size / 10)
}
