use rusqlite::{params, Connection, Result};
const SCHEMA_VERSION: i32 = 3;

/// Job classes every catalog starts with; class 1 is the default.
pub const SEED_JOB_CLASSES: [&str; 5] = [
    "Routine Maintenance",
    "Data Import",
    "Data Export",
    "Data Summarisation",
    "Miscellaneous",
];

/// Brings the catalog attached as `pgagent` up to the current schema.
pub struct Migrator {
    conn: Connection,
}

impl Migrator {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn run_migrations(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS pgagent.schema_version (
                version INTEGER PRIMARY KEY,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        log::info!("Current catalog schema version: {}", current_version);

        if current_version < SCHEMA_VERSION {
            log::info!("Migrating catalog from version {} to {}", current_version, SCHEMA_VERSION);
            self.migrate_from(current_version)?;
        }

        Ok(())
    }

    fn get_current_version(&self) -> Result<i32> {
        let version: Option<i32> = self.conn.query_row(
            "SELECT MAX(version) FROM pgagent.schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version.unwrap_or(0))
    }

    fn migrate_from(&mut self, from_version: i32) -> Result<()> {
        let tx = self.conn.transaction()?;

        for version in (from_version + 1)..=SCHEMA_VERSION {
            log::info!("Applying migration to version {}", version);
            match version {
                1 => Self::migrate_to_v1_impl(&tx)?,
                2 => Self::migrate_to_v2_impl(&tx)?,
                3 => Self::migrate_to_v3_impl(&tx)?,
                _ => return Err(rusqlite::Error::InvalidQuery),
            }

            tx.execute(
                "INSERT INTO pgagent.schema_version (version) VALUES (?1)",
                params![version],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn migrate_to_v1_impl(tx: &rusqlite::Transaction) -> Result<()> {
        // Job catalog: classes, jobs, their steps and schedules, run log
        tx.execute(
            "CREATE TABLE IF NOT EXISTS pgagent.pga_jobclass (
                jclid INTEGER PRIMARY KEY,
                jclname TEXT NOT NULL UNIQUE
            )",
            [],
        )?;

        for (i, name) in SEED_JOB_CLASSES.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO pgagent.pga_jobclass (jclid, jclname) VALUES (?1, ?2)",
                params![i as i64 + 1, name],
            )?;
        }

        tx.execute(
            "CREATE TABLE IF NOT EXISTS pgagent.pga_job (
                jobid INTEGER PRIMARY KEY AUTOINCREMENT,
                jobjclid INTEGER NOT NULL REFERENCES pga_jobclass(jclid),
                jobname TEXT NOT NULL,
                jobdesc TEXT NOT NULL DEFAULT '',
                jobhostagent TEXT NOT NULL DEFAULT '',
                jobenabled BOOLEAN NOT NULL DEFAULT 1,
                jobcreated TEXT NOT NULL,
                jobchanged TEXT NOT NULL,
                jobagentid INTEGER,
                jobnextrun TEXT,
                joblastrun TEXT
            )",
            [],
        )?;

        tx.execute(
            "CREATE TABLE IF NOT EXISTS pgagent.pga_jobstep (
                jstid INTEGER PRIMARY KEY AUTOINCREMENT,
                jstjobid INTEGER NOT NULL REFERENCES pga_job(jobid) ON DELETE CASCADE,
                jstname TEXT NOT NULL,
                jstdesc TEXT NOT NULL DEFAULT '',
                jstenabled BOOLEAN NOT NULL DEFAULT 1,
                jstkind TEXT NOT NULL,
                jstconntype TEXT NOT NULL,
                jstdbname TEXT NOT NULL DEFAULT '',
                jstconnstr TEXT NOT NULL DEFAULT '',
                jstcode TEXT NOT NULL DEFAULT '',
                jstonerror TEXT NOT NULL
            )",
            [],
        )?;

        tx.execute(
            "CREATE INDEX IF NOT EXISTS pgagent.idx_jobstep_jobid ON pga_jobstep(jstjobid)",
            [],
        )?;

        tx.execute(
            "CREATE TABLE IF NOT EXISTS pgagent.pga_schedule (
                jscid INTEGER PRIMARY KEY AUTOINCREMENT,
                jscjobid INTEGER NOT NULL REFERENCES pga_job(jobid) ON DELETE CASCADE,
                jscname TEXT NOT NULL,
                jscdesc TEXT NOT NULL DEFAULT '',
                jscenabled BOOLEAN NOT NULL DEFAULT 1,
                jscstart TEXT NOT NULL,
                jscend TEXT
            )",
            [],
        )?;

        tx.execute(
            "CREATE INDEX IF NOT EXISTS pgagent.idx_schedule_jobid ON pga_schedule(jscjobid)",
            [],
        )?;

        tx.execute(
            "CREATE TABLE IF NOT EXISTS pgagent.pga_joblog (
                jlgid INTEGER PRIMARY KEY AUTOINCREMENT,
                jlgjobid INTEGER NOT NULL REFERENCES pga_job(jobid) ON DELETE CASCADE,
                jlgstatus TEXT NOT NULL DEFAULT 'r',
                jlgstart TEXT NOT NULL,
                jlgduration TEXT
            )",
            [],
        )?;

        tx.execute(
            "CREATE INDEX IF NOT EXISTS pgagent.idx_joblog_jobid ON pga_joblog(jlgjobid)",
            [],
        )?;

        Ok(())
    }

    fn migrate_to_v2_impl(tx: &rusqlite::Transaction) -> Result<()> {
        // Audit rows outlive the job they describe, so no foreign key
        log::info!("Adding job audit log...");

        tx.execute(
            "CREATE TABLE IF NOT EXISTS pgagent.pga_job_audit_log (
                audit_id INTEGER PRIMARY KEY AUTOINCREMENT,
                jobid INTEGER,
                operation_type TEXT NOT NULL
                    CHECK (operation_type IN ('CREATE', 'MODIFY', 'DELETE', 'EXECUTE')),
                operation_time TEXT NOT NULL,
                operation_user TEXT NOT NULL,
                old_values TEXT,
                new_values TEXT,
                additional_info TEXT
            )",
            [],
        )?;

        tx.execute(
            "CREATE INDEX IF NOT EXISTS pgagent.idx_job_audit_log_jobid ON pga_job_audit_log(jobid)",
            [],
        )?;

        tx.execute(
            "CREATE INDEX IF NOT EXISTS pgagent.idx_job_audit_log_time ON pga_job_audit_log(operation_time)",
            [],
        )?;

        Ok(())
    }

    fn migrate_to_v3_impl(tx: &rusqlite::Transaction) -> Result<()> {
        // Steps and schedules keep the order they were entered in
        log::info!("Adding step and schedule positions...");

        tx.execute(
            "ALTER TABLE pgagent.pga_jobstep ADD COLUMN jstpos INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
        tx.execute(
            "ALTER TABLE pgagent.pga_schedule ADD COLUMN jscpos INTEGER NOT NULL DEFAULT 0",
            [],
        )?;

        // Existing rows fall back to creation order
        tx.execute("UPDATE pgagent.pga_jobstep SET jstpos = jstid", [])?;
        tx.execute("UPDATE pgagent.pga_schedule SET jscpos = jscid", [])?;

        Ok(())
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("ATTACH DATABASE ':memory:' AS pgagent", []).unwrap();
        conn
    }

    #[test]
    fn test_migrations_seed_job_classes() {
        let mut migrator = Migrator::new(attached());
        migrator.run_migrations().unwrap();
        let conn = migrator.into_connection();

        let names: Vec<String> = conn
            .prepare("SELECT jclname FROM pgagent.pga_jobclass ORDER BY jclid")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(names, SEED_JOB_CLASSES.to_vec());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut migrator = Migrator::new(attached());
        migrator.run_migrations().unwrap();
        migrator.run_migrations().unwrap();
        assert_eq!(migrator.get_current_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_audit_operation_type_checked() {
        let mut migrator = Migrator::new(attached());
        migrator.run_migrations().unwrap();
        let conn = migrator.into_connection();

        let result = conn.execute(
            "INSERT INTO pgagent.pga_job_audit_log (jobid, operation_type, operation_time, operation_user)
             VALUES (1, 'TRUNCATE', '2025-01-01 00:00:00', 'root')",
            [],
        );
        assert!(result.is_err());
    }
}
