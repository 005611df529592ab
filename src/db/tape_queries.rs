use super::models::TapeEntry;
use super::Database;
use anyhow::Result;
use rusqlite::params;

impl Database {
    /// The tape list, most recently written first.
    pub fn get_tapes(&self) -> Result<Vec<TapeEntry>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT label, position, datestamp, reuse FROM tapes ORDER BY position")?;
        let tapes = stmt
            .query_map([], |row| {
                Ok(TapeEntry {
                    label: row.get(0)?,
                    position: row.get::<_, i64>(1)? as u32,
                    datestamp: row.get(2)?,
                    reuse: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tapes)
    }

    /// Insert or replace a tape list entry.
    #[cfg(test)]
    pub fn upsert_tape(&self, tape: &TapeEntry) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tapes (label, position, datestamp, reuse) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(label) DO UPDATE SET
                position = excluded.position,
                datestamp = excluded.datestamp,
                reuse = excluded.reuse",
            params![tape.label, i64::from(tape.position), tape.datestamp, i64::from(tape.reuse)],
        )?;
        Ok(())
    }
}
