//! Parsers for the `--step` and `--schedule` command-line specs.
//!
//! A spec is a comma separated list of `key=value` pairs. `code` must come
//! last and takes the rest of the spec, commas included:
//!
//!   name=vacuum,db=postgres,code=VACUUM ANALYZE;
//!   name=nightly,start=2025-01-01 02:00,end=2025-12-31

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use common::{ConnType, JobSchedule, JobStep, OnError, StepKind};

fn pairs(spec: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut rest = spec.trim();
    while !rest.is_empty() {
        let (key, tail) = rest
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected key=value in '{}'", rest))?;
        let key = key.trim().to_lowercase();
        if key == "code" {
            pairs.push((key, tail.to_string()));
            break;
        }
        let (value, next) = tail.split_once(',').unwrap_or((tail, ""));
        pairs.push((key, value.trim().to_string()));
        rest = next.trim_start();
    }
    Ok(pairs)
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(anyhow!("Invalid boolean: {}", s)),
    }
}

pub fn parse_step(spec: &str) -> Result<JobStep> {
    let mut step = JobStep::new("");
    for (key, value) in pairs(spec)? {
        match key.as_str() {
            "name" => step.jstname = value,
            "desc" => step.jstdesc = value,
            "enabled" => step.jstenabled = parse_bool(&value)?,
            "kind" => {
                step.jstkind = match value.to_lowercase().as_str() {
                    "sql" | "s" => StepKind::Sql,
                    "batch" | "b" => StepKind::Batch,
                    _ => return Err(anyhow!("Unknown step kind: {}", value)),
                }
            }
            "conn" => {
                step.jstconntype = match value.to_lowercase().as_str() {
                    "local" => ConnType::Local,
                    "remote" => ConnType::Remote,
                    _ => return Err(anyhow!("Unknown connection type: {}", value)),
                }
            }
            "db" => step.jstdbname = value,
            "connstr" => step.jstconnstr = value,
            "code" => step.jstcode = value,
            "onerror" => {
                step.jstonerror = match value.to_lowercase().as_str() {
                    "fail" | "f" => OnError::Fail,
                    "success" | "s" => OnError::Success,
                    "ignore" | "i" => OnError::Ignore,
                    _ => return Err(anyhow!("Unknown on-error action: {}", value)),
                }
            }
            _ => return Err(anyhow!("Unknown step key: {}", key)),
        }
    }
    Ok(step)
}

/// `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]` (UTC) or RFC 3339.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| anyhow!("Invalid timestamp: {}. Use YYYY-MM-DD [HH:MM[:SS]]", s))
}

pub fn parse_schedule(spec: &str) -> Result<JobSchedule> {
    let mut name = String::new();
    let mut desc = String::new();
    let mut enabled = true;
    let mut start = None;
    let mut end = None;

    for (key, value) in pairs(spec)? {
        match key.as_str() {
            "name" => name = value,
            "desc" => desc = value,
            "enabled" => enabled = parse_bool(&value)?,
            "start" => start = Some(parse_timestamp(&value)?),
            "end" => end = Some(parse_timestamp(&value)?),
            _ => return Err(anyhow!("Unknown schedule key: {}", key)),
        }
    }

    let start = start.ok_or_else(|| anyhow!("Schedule '{}' needs a start", name))?;
    let mut schedule = JobSchedule::new(name, start);
    schedule.jscdesc = desc;
    schedule.jscenabled = enabled;
    schedule.jscend = end;
    Ok(schedule)
}
