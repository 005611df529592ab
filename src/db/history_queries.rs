use super::models::{Directives, HistoryEntry, HistoryRecord, LevelStats, Perf};
use super::Database;
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

struct InfoRow {
    id: i64,
    command: i64,
    last_level: Option<i64>,
    consecutive_runs: Option<i64>,
    full_perf: String,
    incr_perf: String,
}

impl Database {
    /// Fetch the history of one disk. `None` means the disk has never been dumped.
    pub fn get_record(&self, host: &str, disk: &str) -> Result<Option<HistoryRecord>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, command, last_level, consecutive_runs, full_perf, incr_perf \
                 FROM disk_info WHERE host = ?1 AND disk = ?2",
                params![host, disk],
                |row| {
                    Ok(InfoRow {
                        id: row.get(0)?,
                        command: row.get(1)?,
                        last_level: row.get(2)?,
                        consecutive_runs: row.get(3)?,
                        full_perf: row.get(4)?,
                        incr_perf: row.get(5)?,
                    })
                },
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let full: Perf = serde_json::from_str(&row.full_perf)
            .with_context(|| format!("Corrupt full_perf for {host}:{disk}"))?;
        let incr: Perf = serde_json::from_str(&row.incr_perf)
            .with_context(|| format!("Corrupt incr_perf for {host}:{disk}"))?;

        let mut stmt = conn.prepare(
            "SELECT level, size, csize, secs, dump_date, label \
             FROM level_stats WHERE disk_id = ?1 ORDER BY level",
        )?;
        let levels = stmt
            .query_map(params![row.id], |r| {
                Ok((
                    r.get::<_, i64>(0)? as u32,
                    LevelStats {
                        size: r.get::<_, i64>(1)? as u64,
                        csize: r.get::<_, i64>(2)? as u64,
                        secs: r.get::<_, i64>(3)? as u64,
                        date: r.get(4)?,
                        label: r.get(5)?,
                    },
                ))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        drop(stmt);

        let mut stmt = conn.prepare(
            "SELECT level, size, csize, secs, dump_date FROM dump_history \
             WHERE disk_id = ?1 ORDER BY dump_date, id",
        )?;
        let history = stmt
            .query_map(params![row.id], |r| {
                Ok(HistoryEntry {
                    level: r.get::<_, i64>(0)? as u32,
                    size: r.get::<_, i64>(1)? as u64,
                    csize: r.get::<_, i64>(2)? as u64,
                    secs: r.get::<_, i64>(3)? as u64,
                    date: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(HistoryRecord {
            directives: Directives::from_bits(row.command),
            levels,
            full,
            incr,
            last_level: row.last_level.and_then(|l| u32::try_from(l).ok()),
            consecutive_runs: row.consecutive_runs.and_then(|r| u32::try_from(r).ok()),
            history,
        }))
    }

    /// Replace the stored history of one disk. The dump and tape writers own
    /// this table; the planner itself only reads it.
    #[cfg(test)]
    pub fn put_record(&self, host: &str, disk: &str, record: &HistoryRecord) -> Result<()> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO disk_info \
             (host, disk, command, last_level, consecutive_runs, full_perf, incr_perf)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(host, disk) DO UPDATE SET
                command = excluded.command,
                last_level = excluded.last_level,
                consecutive_runs = excluded.consecutive_runs,
                full_perf = excluded.full_perf,
                incr_perf = excluded.incr_perf,
                updated_at = datetime('now')",
            params![
                host,
                disk,
                record.directives.bits(),
                record.last_level.map(i64::from),
                record.consecutive_runs.map(i64::from),
                serde_json::to_string(&record.full)?,
                serde_json::to_string(&record.incr)?,
            ],
        )?;

        let disk_id: i64 = tx.query_row(
            "SELECT id FROM disk_info WHERE host = ?1 AND disk = ?2",
            params![host, disk],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM level_stats WHERE disk_id = ?1", params![disk_id])?;
        tx.execute("DELETE FROM dump_history WHERE disk_id = ?1", params![disk_id])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO level_stats (disk_id, level, size, csize, secs, dump_date, label)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (level, stats) in &record.levels {
                stmt.execute(params![
                    disk_id,
                    i64::from(*level),
                    stats.size as i64,
                    stats.csize as i64,
                    stats.secs as i64,
                    stats.date,
                    stats.label,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO dump_history (disk_id, level, size, csize, secs, dump_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in &record.history {
                stmt.execute(params![
                    disk_id,
                    i64::from(entry.level),
                    entry.size as i64,
                    entry.csize as i64,
                    entry.secs as i64,
                    entry.date,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}
