//! SQLite catalog. The catalog file is attached under the `pgagent` schema
//! so audit queries written against `pgagent.pga_job_audit_log` run as-is.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use common::audit::AUDIT_LOG_TABLE;
use common::{
    AuditLogEntry, AuditParams, Job, JobClass, JobId, JobPayload, JobRunStatus, JobSchedule,
    JobStep, JobSummary, OperationType,
};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::migrations::Migrator;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp_column(row: &Row, idx: usize) -> Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(text) => parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("invalid timestamp '{}'", text))),
    }
}

/// Single-letter and lowercase enum tokens are stored exactly as they
/// travel on the wire.
fn wire_code<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(code)) => code,
        _ => String::new(),
    }
}

fn code_column<T: DeserializeOwned>(row: &Row, idx: usize) -> Result<T> {
    let code: String = row.get(idx)?;
    serde_json::from_value(Value::String(code.clone()))
        .map_err(|_| conversion_error(idx, format!("unknown code '{}'", code)))
}

fn json_column(row: &Row, idx: usize) -> Result<Option<Value>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| conversion_error(idx, e.to_string())),
    }
}

/// Snapshot of a job as recorded in audit old/new values.
fn snapshot(payload: &JobPayload) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

fn payload_of(job: &Job) -> JobPayload {
    JobPayload {
        jobname: job.jobname.clone(),
        jobenabled: job.jobenabled,
        jobhostagent: job.jobhostagent.clone(),
        jobjclid: job.jobjclid,
        jobdesc: job.jobdesc.clone(),
        jsteps: job.jsteps.clone(),
        jschedules: job.jschedules.clone(),
    }
}

/// One row about to be appended to the audit log.
pub struct AuditRecord<'a> {
    pub jobid: JobId,
    pub operation: OperationType,
    pub user: &'a str,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub additional_info: Option<String>,
}

fn append_audit(conn: &Connection, record: &AuditRecord, at: &DateTime<Utc>) -> Result<i64> {
    let old_values = record.old_values.as_ref().map(Value::to_string);
    let new_values = record.new_values.as_ref().map(Value::to_string);
    conn.execute(
        &format!(
            "INSERT INTO {} (jobid, operation_type, operation_time, operation_user, old_values, new_values, additional_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            AUDIT_LOG_TABLE
        ),
        params![
            record.jobid.0,
            record.operation.as_str(),
            format_timestamp(at),
            record.user,
            old_values,
            new_values,
            record.additional_info,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_children(conn: &Connection, jobid: JobId, payload: &JobPayload) -> Result<()> {
    for (pos, step) in payload.jsteps.iter().enumerate() {
        conn.execute(
            "INSERT INTO pgagent.pga_jobstep
                (jstid, jstjobid, jstname, jstdesc, jstenabled, jstkind, jstconntype, jstdbname, jstconnstr, jstcode, jstonerror, jstpos)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                step.jstid,
                jobid.0,
                step.jstname,
                step.jstdesc,
                step.jstenabled,
                wire_code(&step.jstkind),
                wire_code(&step.jstconntype),
                step.jstdbname,
                step.jstconnstr,
                step.jstcode,
                wire_code(&step.jstonerror),
                pos as i64,
            ],
        )?;
    }

    for (pos, schedule) in payload.jschedules.iter().enumerate() {
        conn.execute(
            "INSERT INTO pgagent.pga_schedule (jscid, jscjobid, jscname, jscdesc, jscenabled, jscstart, jscend, jscpos)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                schedule.jscid,
                jobid.0,
                schedule.jscname,
                schedule.jscdesc,
                schedule.jscenabled,
                format_timestamp(&schedule.jscstart),
                schedule.jscend.as_ref().map(format_timestamp),
                pos as i64,
            ],
        )?;
    }

    Ok(())
}

fn delete_children(conn: &Connection, jobid: JobId) -> Result<()> {
    conn.execute("DELETE FROM pgagent.pga_jobstep WHERE jstjobid = ?1", params![jobid.0])?;
    conn.execute("DELETE FROM pgagent.pga_schedule WHERE jscjobid = ?1", params![jobid.0])?;
    Ok(())
}

const LAST_STATUS: &str = "(SELECT jlgstatus FROM pgagent.pga_joblog
      WHERE jlgjobid = j.jobid ORDER BY jlgstart DESC, jlgid DESC LIMIT 1)";

fn status_column(row: &Row, idx: usize) -> Result<Option<JobRunStatus>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|code| JobRunStatus::from_code(&code)))
}

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        let path = path.to_string_lossy();
        Self::attach(&path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::attach(":memory:")
    }

    fn attach(path: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("ATTACH DATABASE ?1 AS pgagent", params![path])?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;

        let mut migrator = Migrator::new(conn);
        migrator.run_migrations()?;
        Ok(Self { conn: migrator.into_connection() })
    }

    pub fn job_classes(&self) -> Result<Vec<JobClass>> {
        let mut stmt = self
            .conn
            .prepare("SELECT jclid, jclname FROM pgagent.pga_jobclass ORDER BY jclid")?;
        let classes = stmt
            .query_map([], |row| {
                Ok(JobClass {
                    jclid: row.get(0)?,
                    jclname: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(classes)
    }

    pub fn has_job_class(&self, jclid: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM pgagent.pga_jobclass WHERE jclid = ?1",
                params![jclid],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let sql = format!(
            "SELECT j.jobid, j.jobname, j.jobenabled, {}, j.jobnextrun, j.joblastrun, j.jobdesc
             FROM pgagent.pga_job j ORDER BY j.jobname, j.jobid",
            LAST_STATUS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([], |row| {
                Ok(JobSummary {
                    jobid: JobId(row.get(0)?),
                    jobname: row.get(1)?,
                    jobenabled: row.get(2)?,
                    jlgstatus: status_column(row, 3)?,
                    jobnextrun: timestamp_column(row, 4)?,
                    joblastrun: timestamp_column(row, 5)?,
                    jobdesc: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn get_job(&self, jobid: JobId) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT j.jobid, j.jobname, j.jobenabled, j.jobhostagent, j.jobjclid, j.jobdesc,
                    j.jobcreated, j.jobchanged, j.jobnextrun, j.joblastrun, {}
             FROM pgagent.pga_job j WHERE j.jobid = ?1",
            LAST_STATUS
        );
        let job = self
            .conn
            .query_row(&sql, params![jobid.0], |row| {
                Ok(Job {
                    jobid: Some(JobId(row.get(0)?)),
                    jobname: row.get(1)?,
                    jobenabled: row.get(2)?,
                    jobhostagent: row.get(3)?,
                    jobjclid: row.get(4)?,
                    jobdesc: row.get(5)?,
                    jobcreated: timestamp_column(row, 6)?,
                    jobchanged: timestamp_column(row, 7)?,
                    jobnextrun: timestamp_column(row, 8)?,
                    joblastrun: timestamp_column(row, 9)?,
                    jlgstatus: status_column(row, 10)?,
                    jobrunningat: None,
                    jsteps: Vec::new(),
                    jschedules: Vec::new(),
                })
            })
            .optional()?;

        let Some(mut job) = job else {
            return Ok(None);
        };
        job.jsteps = self.steps(jobid)?;
        job.jschedules = self.schedules(jobid)?;
        Ok(Some(job))
    }

    fn steps(&self, jobid: JobId) -> Result<Vec<JobStep>> {
        let mut stmt = self.conn.prepare(
            "SELECT jstid, jstname, jstdesc, jstenabled, jstkind, jstconntype, jstdbname, jstconnstr, jstcode, jstonerror
             FROM pgagent.pga_jobstep WHERE jstjobid = ?1 ORDER BY jstpos, jstid",
        )?;
        let steps = stmt
            .query_map(params![jobid.0], |row| {
                Ok(JobStep {
                    jstid: Some(row.get(0)?),
                    jstname: row.get(1)?,
                    jstdesc: row.get(2)?,
                    jstenabled: row.get(3)?,
                    jstkind: code_column(row, 4)?,
                    jstconntype: code_column(row, 5)?,
                    jstdbname: row.get(6)?,
                    jstconnstr: row.get(7)?,
                    jstcode: row.get(8)?,
                    jstonerror: code_column(row, 9)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(steps)
    }

    fn schedules(&self, jobid: JobId) -> Result<Vec<JobSchedule>> {
        let mut stmt = self.conn.prepare(
            "SELECT jscid, jscname, jscdesc, jscenabled, jscstart, jscend
             FROM pgagent.pga_schedule WHERE jscjobid = ?1 ORDER BY jscpos, jscid",
        )?;
        let schedules = stmt
            .query_map(params![jobid.0], |row| {
                let jscstart = timestamp_column(row, 4)?
                    .ok_or_else(|| conversion_error(4, "missing schedule start".to_string()))?;
                Ok(JobSchedule {
                    jscid: Some(row.get(0)?),
                    jscname: row.get(1)?,
                    jscdesc: row.get(2)?,
                    jscenabled: row.get(3)?,
                    jscstart,
                    jscend: timestamp_column(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(schedules)
    }

    /// Inserts the job with its steps and schedules and records a CREATE.
    pub fn create_job(&mut self, payload: &JobPayload, user: &str) -> Result<JobId> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO pgagent.pga_job (jobjclid, jobname, jobdesc, jobhostagent, jobenabled, jobcreated, jobchanged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                payload.jobjclid,
                payload.jobname,
                payload.jobdesc,
                payload.jobhostagent,
                payload.jobenabled,
                format_timestamp(&now),
            ],
        )?;
        let jobid = JobId(tx.last_insert_rowid());

        insert_children(&tx, jobid, payload)?;
        append_audit(
            &tx,
            &AuditRecord {
                jobid,
                operation: OperationType::Create,
                user,
                old_values: None,
                new_values: Some(snapshot(payload)),
                additional_info: None,
            },
            &now,
        )?;

        tx.commit()?;
        log::info!("Created job {} '{}' for {}", jobid, payload.jobname, user);
        Ok(jobid)
    }

    /// Replaces the job's scalars and full step and schedule collections.
    /// Returns false when the job does not exist.
    pub fn update_job(&mut self, jobid: JobId, payload: &JobPayload, user: &str) -> Result<bool> {
        let Some(existing) = self.get_job(jobid)? else {
            return Ok(false);
        };
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        tx.execute(
            "UPDATE pgagent.pga_job
             SET jobjclid = ?2, jobname = ?3, jobdesc = ?4, jobhostagent = ?5, jobenabled = ?6, jobchanged = ?7
             WHERE jobid = ?1",
            params![
                jobid.0,
                payload.jobjclid,
                payload.jobname,
                payload.jobdesc,
                payload.jobhostagent,
                payload.jobenabled,
                format_timestamp(&now),
            ],
        )?;

        delete_children(&tx, jobid)?;
        insert_children(&tx, jobid, payload)?;
        append_audit(
            &tx,
            &AuditRecord {
                jobid,
                operation: OperationType::Modify,
                user,
                old_values: Some(snapshot(&payload_of(&existing))),
                new_values: Some(snapshot(payload)),
                additional_info: None,
            },
            &now,
        )?;

        tx.commit()?;
        log::info!("Updated job {} '{}' for {}", jobid, payload.jobname, user);
        Ok(true)
    }

    /// Removes the job and everything it owns. Its audit rows stay.
    pub fn delete_job(&mut self, jobid: JobId, user: &str) -> Result<bool> {
        let Some(existing) = self.get_job(jobid)? else {
            return Ok(false);
        };
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        delete_children(&tx, jobid)?;
        tx.execute("DELETE FROM pgagent.pga_joblog WHERE jlgjobid = ?1", params![jobid.0])?;
        tx.execute("DELETE FROM pgagent.pga_job WHERE jobid = ?1", params![jobid.0])?;
        append_audit(
            &tx,
            &AuditRecord {
                jobid,
                operation: OperationType::Delete,
                user,
                old_values: Some(snapshot(&payload_of(&existing))),
                new_values: None,
                additional_info: None,
            },
            &now,
        )?;

        tx.commit()?;
        log::info!("Deleted job {} '{}' for {}", jobid, existing.jobname, user);
        Ok(true)
    }

    /// Marks the job due immediately. Returns the job name, or None when
    /// the job does not exist.
    pub fn run_now(&mut self, jobid: JobId, user: &str) -> Result<Option<String>> {
        let Some(existing) = self.get_job(jobid)? else {
            return Ok(None);
        };
        let now = Utc::now();
        let stamp = format_timestamp(&now);
        let tx = self.conn.transaction()?;

        tx.execute(
            "UPDATE pgagent.pga_job SET jobnextrun = ?2 WHERE jobid = ?1",
            params![jobid.0, stamp],
        )?;
        append_audit(
            &tx,
            &AuditRecord {
                jobid,
                operation: OperationType::Execute,
                user,
                old_values: existing
                    .jobnextrun
                    .map(|ts| json!({ "jobnextrun": format_timestamp(&ts) })),
                new_values: Some(json!({ "jobnextrun": stamp })),
                additional_info: Some("Run now requested".to_string()),
            },
            &now,
        )?;

        tx.commit()?;
        log::info!("Job {} '{}' scheduled to run now by {}", jobid, existing.jobname, user);
        Ok(Some(existing.jobname))
    }

    /// Audit rows for one job, newest first. Every filter value is bound
    /// as a parameter.
    pub fn audit_log(&self, jobid: JobId, filters: &AuditParams) -> Result<Vec<AuditLogEntry>> {
        let mut sql = format!(
            "SELECT audit_id, jobid, operation_type, operation_time, operation_user, old_values, new_values, additional_info
             FROM {} WHERE jobid = ?",
            AUDIT_LOG_TABLE
        );
        let mut values = vec![SqlValue::Integer(jobid.0)];

        if let Some(op) = filters.operation_types {
            sql.push_str(" AND operation_type = ?");
            values.push(SqlValue::Text(op.as_str().to_string()));
        }
        if let Some(from) = filters.date_from {
            sql.push_str(" AND date(operation_time) >= ?");
            values.push(SqlValue::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filters.date_to {
            sql.push_str(" AND date(operation_time) <= ?");
            values.push(SqlValue::Text(to.format("%Y-%m-%d").to_string()));
        }
        sql.push_str(" ORDER BY operation_time DESC, audit_id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let operation: String = row.get(2)?;
                let operation_type = OperationType::parse(&operation)
                    .map_err(|e| conversion_error(2, e.to_string()))?;
                Ok(AuditLogEntry {
                    audit_id: row.get(0)?,
                    jobid: row.get::<_, Option<i64>>(1)?.map(JobId),
                    operation_type,
                    operation_time: row.get(3)?,
                    operation_user: row.get(4)?,
                    old_values: json_column(row, 5)?,
                    new_values: json_column(row, 6)?,
                    additional_info: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Deletes audit rows older than `days` days. Zero keeps everything.
    pub fn prune_audit_log(&self, days: u32) -> Result<usize> {
        if days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let removed = self.conn.execute(
            &format!("DELETE FROM {} WHERE operation_time < ?1", AUDIT_LOG_TABLE),
            params![format_timestamp(&cutoff)],
        )?;
        if removed > 0 {
            log::info!("Pruned {} audit rows older than {} days", removed, days);
        }
        Ok(removed)
    }
}
