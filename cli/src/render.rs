use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use common::schema::{AuditLogSchema, FieldDescriptor};
use common::{AuditLogEntry, JobSchedule, JobStep, JobSummary};
use serde_json::Value;

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header);
    table
}

fn timestamp(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub fn job_list_table(jobs: &[JobSummary]) -> Table {
    let mut t = table(vec!["ID", "Name", "Enabled?", "Last result", "Next run", "Last run", "Comment"]);
    for job in jobs {
        t.add_row(vec![
            job.jobid.to_string(),
            job.jobname.clone(),
            job.jobenabled.to_string(),
            job.jlgstatus.map(|s| s.to_string()).unwrap_or_else(|| "Unknown".to_string()),
            timestamp(job.jobnextrun.as_ref()),
            timestamp(job.joblastrun.as_ref()),
            job.jobdesc.clone(),
        ]);
    }
    t
}

pub fn properties_table(rows: &[(&'static str, String)]) -> Table {
    let mut t = table(vec!["Property", "Value"]);
    for (label, value) in rows {
        t.add_row(vec![label.to_string(), value.clone()]);
    }
    t
}

pub fn steps_table(steps: &[JobStep]) -> Table {
    let mut t = table(vec!["Name", "Enabled?", "Kind", "Connection type", "On error"]);
    for step in steps {
        t.add_row(vec![
            step.jstname.clone(),
            step.jstenabled.to_string(),
            format!("{:?}", step.jstkind),
            format!("{:?}", step.jstconntype),
            format!("{:?}", step.jstonerror),
        ]);
    }
    t
}

pub fn schedules_table(schedules: &[JobSchedule]) -> Table {
    let mut t = table(vec!["Name", "Enabled?", "Start", "End", "Comment"]);
    for schedule in schedules {
        t.add_row(vec![
            schedule.jscname.clone(),
            schedule.jscenabled.to_string(),
            timestamp(Some(&schedule.jscstart)),
            timestamp(schedule.jscend.as_ref()),
            schedule.jscdesc.clone(),
        ]);
    }
    t
}

/// Header and display rows of audit entries, one column per audit field.
pub fn audit_rows(entries: &[AuditLogEntry]) -> Result<(Vec<&'static str>, Vec<Vec<String>>)> {
    let fields: Vec<FieldDescriptor> = AuditLogSchema.fields();
    let header = fields.iter().map(|f| f.label).collect();

    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let value = serde_json::to_value(entry)?;
        rows.push(
            fields
                .iter()
                .map(|f| f.display(value.get(f.id).unwrap_or(&Value::Null)))
                .collect(),
        );
    }
    Ok((header, rows))
}

pub fn audit_table(entries: &[AuditLogEntry]) -> Result<Table> {
    let (header, rows) = audit_rows(entries)?;
    let mut t = table(header);
    for row in rows {
        t.add_row(row);
    }
    Ok(t)
}

pub fn write_audit_csv<W: Write>(entries: &[AuditLogEntry], writer: W) -> Result<()> {
    let (header, rows) = audit_rows(entries)?;
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&header)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}
