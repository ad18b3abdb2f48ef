use serde::{Deserialize, Serialize};

use crate::audit::{AuditLogEntry, AuditParams, AUDIT_LOG_RESOURCE};
use crate::job::{Job, JobClass, JobId, JobPayload, JobSummary};

/// One message per line; requests and responses are JSON objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    ServerInfo,
    ListJobClasses,
    ListJobs,
    GetJob(JobId),
    CreateJob(JobPayload),
    UpdateJob { jobid: JobId, payload: JobPayload },
    DeleteJob(JobId),
    RunNow(JobId),
    GetAuditLog { jobid: JobId, params: AuditParams },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::ServerInfo => "server_info",
            Request::ListJobClasses => "list_job_classes",
            Request::ListJobs => "list_jobs",
            Request::GetJob(_) => "get_job",
            Request::CreateJob(_) => "create_job",
            Request::UpdateJob { .. } => "update_job",
            Request::DeleteJob(_) => "delete_job",
            Request::RunNow(_) => "run_now",
            Request::GetAuditLog { .. } => "get_audit_log",
        }
    }

    /// Logical resource path, used in log lines.
    pub fn path(&self) -> String {
        match self {
            Request::ServerInfo => "/server".to_string(),
            Request::ListJobClasses => "/classes".to_string(),
            Request::ListJobs | Request::CreateJob(_) => "/jobs".to_string(),
            Request::GetJob(id) | Request::DeleteJob(id) => format!("/jobs/{}", id),
            Request::UpdateJob { jobid, .. } => format!("/jobs/{}", jobid),
            Request::RunNow(id) => format!("/jobs/{}/run_now", id),
            Request::GetAuditLog { jobid, params } => {
                let mut path = format!("/jobs/{}/{}", jobid, AUDIT_LOG_RESOURCE);
                let query: Vec<String> = params
                    .query_pairs()
                    .into_iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                if !query.is_empty() {
                    path.push('?');
                    path.push_str(&query.join("&"));
                }
                path
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(String),
    Server(ServerInfo),
    JobClasses(Vec<JobClass>),
    JobList(Vec<JobSummary>),
    JobDetail(Option<Job>),
    Created(JobId),
    RunNow { info: String },
    AuditLog(Vec<AuditLogEntry>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub databases: Vec<String>,
}

pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim_end())
}
