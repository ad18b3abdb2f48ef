use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::JobSchedule;
use crate::step::JobStep;

/// Job class assigned when the user does not pick one.
pub const DEFAULT_JOB_CLASS: i64 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the job-class enumeration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobClass {
    pub jclid: i64,
    pub jclname: String,
}

/// Result of the most recent run, as recorded by the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobRunStatus {
    #[serde(rename = "r")]
    Running,
    #[serde(rename = "s")]
    Successful,
    #[serde(rename = "f")]
    Failed,
    #[serde(rename = "i")]
    InternalFailure,
    #[serde(rename = "d")]
    Aborted,
}

impl JobRunStatus {
    pub fn code(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "r",
            JobRunStatus::Successful => "s",
            JobRunStatus::Failed => "f",
            JobRunStatus::InternalFailure => "i",
            JobRunStatus::Aborted => "d",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(JobRunStatus::Running),
            "s" => Some(JobRunStatus::Successful),
            "f" => Some(JobRunStatus::Failed),
            "i" => Some(JobRunStatus::InternalFailure),
            "d" => Some(JobRunStatus::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            JobRunStatus::Running => "Running",
            JobRunStatus::Successful => "Successful",
            JobRunStatus::Failed => "Failed",
            JobRunStatus::InternalFailure => "Internal failure",
            JobRunStatus::Aborted => "Aborted",
        };
        f.write_str(text)
    }
}

fn default_true() -> bool {
    true
}

fn default_job_class() -> i64 {
    DEFAULT_JOB_CLASS
}

/// A scheduled job together with the steps and schedules it owns.
///
/// `jobid`, the timestamps and the run-state fields are assigned by the
/// server; a job without a `jobid` has not been created yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    #[serde(default)]
    pub jobid: Option<JobId>,
    pub jobname: String,
    #[serde(default = "default_true")]
    pub jobenabled: bool,
    #[serde(default)]
    pub jobhostagent: String,
    #[serde(default = "default_job_class")]
    pub jobjclid: i64,
    #[serde(default)]
    pub jobdesc: String,
    #[serde(default)]
    pub jobcreated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jobchanged: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jobnextrun: Option<DateTime<Utc>>,
    #[serde(default)]
    pub joblastrun: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jlgstatus: Option<JobRunStatus>,
    #[serde(default)]
    pub jobrunningat: Option<String>,
    #[serde(default)]
    pub jsteps: Vec<JobStep>,
    #[serde(default)]
    pub jschedules: Vec<JobSchedule>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            jobid: None,
            jobname: String::new(),
            jobenabled: true,
            jobhostagent: String::new(),
            jobjclid: DEFAULT_JOB_CLASS,
            jobdesc: String::new(),
            jobcreated: None,
            jobchanged: None,
            jobnextrun: None,
            joblastrun: None,
            jlgstatus: None,
            jobrunningat: None,
            jsteps: Vec::new(),
            jschedules: Vec::new(),
        }
    }
}

impl Job {
    pub fn is_transient(&self) -> bool {
        self.jobid.is_none()
    }

    pub fn last_result_display(&self) -> String {
        self.jlgstatus
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn running_at_display(&self) -> &str {
        self.jobrunningat
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("Not running currently.")
    }
}

/// Row shown for each job in the job collection listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub jobid: JobId,
    pub jobname: String,
    pub jobenabled: bool,
    pub jlgstatus: Option<JobRunStatus>,
    pub jobnextrun: Option<DateTime<Utc>>,
    pub joblastrun: Option<DateTime<Utc>>,
    pub jobdesc: String,
}

/// What a create or edit submits: the editable scalars plus the complete
/// step and schedule collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobPayload {
    pub jobname: String,
    pub jobenabled: bool,
    pub jobhostagent: String,
    pub jobjclid: i64,
    pub jobdesc: String,
    pub jsteps: Vec<JobStep>,
    pub jschedules: Vec<JobSchedule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_defaults() {
        let job = Job::default();
        assert!(job.is_transient());
        assert!(job.jobenabled);
        assert_eq!(job.jobjclid, DEFAULT_JOB_CLASS);
        assert!(job.jsteps.is_empty());
        assert!(job.jschedules.is_empty());
    }

    #[test]
    fn test_missing_run_state_display() {
        let mut job = Job::default();
        assert_eq!(job.last_result_display(), "Unknown");
        assert_eq!(job.running_at_display(), "Not running currently.");

        job.jlgstatus = Some(JobRunStatus::Failed);
        job.jobrunningat = Some("agent-01".to_string());
        assert_eq!(job.last_result_display(), "Failed");
        assert_eq!(job.running_at_display(), "agent-01");
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let job: Job = serde_json::from_str(r#"{"jobname": "vacuum"}"#).unwrap();
        assert_eq!(job.jobname, "vacuum");
        assert!(job.jobenabled);
        assert_eq!(job.jobjclid, 1);
        assert_eq!(job.jobid, None);
    }

    #[test]
    fn test_run_status_codes() {
        for status in [
            JobRunStatus::Running,
            JobRunStatus::Successful,
            JobRunStatus::Failed,
            JobRunStatus::InternalFailure,
            JobRunStatus::Aborted,
        ] {
            assert_eq!(JobRunStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(JobRunStatus::from_code("x"), None);
    }
}
