use common::schedule::ScheduleSchema;
use common::schema::Collection;
use common::step::StepSchema;
use common::{JobPayload, Request, Response, ServerInfo};

use crate::db::Db;

/// Answers one request on behalf of `user`. Failures become
/// `Response::Error` so the connection stays usable.
pub fn handle_request(db: &mut Db, server: &ServerInfo, request: Request, user: &str) -> Response {
    let name = request.name();
    match dispatch(db, server, request, user) {
        Ok(response) => response,
        Err(e) => {
            log::error!("{} failed: {}", name, e);
            Response::Error(e.to_string())
        }
    }
}

fn dispatch(db: &mut Db, server: &ServerInfo, request: Request, user: &str) -> anyhow::Result<Response> {
    let response = match request {
        Request::ServerInfo => Response::Server(server.clone()),
        Request::ListJobClasses => Response::JobClasses(db.job_classes()?),
        Request::ListJobs => Response::JobList(db.list_jobs()?),
        Request::GetJob(jobid) => Response::JobDetail(db.get_job(jobid)?),
        Request::CreateJob(payload) => {
            if let Err(message) = validate_payload(db, server, &payload)? {
                return Ok(Response::Error(message));
            }
            Response::Created(db.create_job(&payload, user)?)
        }
        Request::UpdateJob { jobid, payload } => {
            if let Err(message) = validate_payload(db, server, &payload)? {
                return Ok(Response::Error(message));
            }
            if db.update_job(jobid, &payload, user)? {
                Response::Ok
            } else {
                job_not_found(jobid)
            }
        }
        Request::DeleteJob(jobid) => {
            if db.delete_job(jobid, user)? {
                Response::Ok
            } else {
                job_not_found(jobid)
            }
        }
        Request::RunNow(jobid) => match db.run_now(jobid, user)? {
            Some(name) => Response::RunNow {
                info: format!("Job '{}' is scheduled to run now.", name),
            },
            None => job_not_found(jobid),
        },
        Request::GetAuditLog { jobid, params } => {
            if let (Some(from), Some(to)) = (params.date_from, params.date_to) {
                if from > to {
                    return Ok(Response::Error(format!(
                        "Invalid filter value for date_to: {} is before {}",
                        to, from
                    )));
                }
            }
            Response::AuditLog(db.audit_log(jobid, &params)?)
        }
    };
    Ok(response)
}

fn job_not_found(jobid: common::JobId) -> Response {
    Response::Error(format!("Job {} not found", jobid))
}

/// Same checks the client runs before sending, repeated so a payload from
/// any client is held to them.
fn validate_payload(
    db: &Db,
    server: &ServerInfo,
    payload: &JobPayload,
) -> anyhow::Result<Result<(), String>> {
    if payload.jobname.trim().is_empty() {
        return Ok(Err("'Name' cannot be empty.".to_string()));
    }
    if !db.has_job_class(payload.jobjclid)? {
        return Ok(Err(format!("Unknown job class {}", payload.jobjclid)));
    }

    let steps = Collection::from_rows("jsteps", payload.jsteps.clone());
    if let Err(e) = steps.validate(&StepSchema::new(server.databases.clone())) {
        return Ok(Err(format!("Step {}", row_error(&e))));
    }
    let schedules = Collection::from_rows("jschedules", payload.jschedules.clone());
    if let Err(e) = schedules.validate(&ScheduleSchema) {
        return Ok(Err(format!("Schedule {}", row_error(&e))));
    }
    Ok(Ok(()))
}

fn row_error(e: &common::ValidationError) -> String {
    match e.row {
        Some(row) => format!("{}: {}", row + 1, e),
        None => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::{AuditParams, JobId, JobStep, OperationType};

    fn server() -> ServerInfo {
        ServerInfo {
            name: "local".to_string(),
            version: "1.0.0".to_string(),
            databases: vec!["postgres".to_string()],
        }
    }

    fn payload(name: &str) -> JobPayload {
        let mut step = JobStep::new("vacuum");
        step.jstdbname = "postgres".to_string();
        step.jstcode = "VACUUM;".to_string();
        JobPayload {
            jobname: name.to_string(),
            jobenabled: true,
            jobhostagent: String::new(),
            jobjclid: 1,
            jobdesc: String::new(),
            jsteps: vec![step],
            jschedules: Vec::new(),
        }
    }

    fn create(db: &mut Db, name: &str) -> JobId {
        match handle_request(db, &server(), Request::CreateJob(payload(name)), "root") {
            Response::Created(id) => id,
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_run_now_info_message() {
        let mut db = Db::open_in_memory().unwrap();
        let id = create(&mut db, "backup");

        match handle_request(&mut db, &server(), Request::RunNow(id), "root") {
            Response::RunNow { info } => assert_eq!(info, "Job 'backup' is scheduled to run now."),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_missing_job_is_error_response() {
        let mut db = Db::open_in_memory().unwrap();
        for request in [Request::RunNow(JobId(3)), Request::DeleteJob(JobId(3))] {
            match handle_request(&mut db, &server(), request, "root") {
                Response::Error(message) => assert_eq!(message, "Job 3 not found"),
                other => panic!("unexpected response {:?}", other),
            }
        }
    }

    #[test]
    fn test_create_validates_payload() {
        let mut db = Db::open_in_memory().unwrap();

        let mut blank = payload("  ");
        blank.jsteps.clear();
        match handle_request(&mut db, &server(), Request::CreateJob(blank), "root") {
            Response::Error(message) => assert_eq!(message, "'Name' cannot be empty."),
            other => panic!("unexpected response {:?}", other),
        }

        let mut bad_class = payload("x");
        bad_class.jobjclid = 99;
        assert!(matches!(
            handle_request(&mut db, &server(), Request::CreateJob(bad_class), "root"),
            Response::Error(_)
        ));

        let mut bad_db = payload("x");
        bad_db.jsteps[0].jstdbname = "nowhere".to_string();
        match handle_request(&mut db, &server(), Request::CreateJob(bad_db), "root") {
            Response::Error(message) => assert!(message.starts_with("Step 1: ")),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(db.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_audit_log_filtered_by_operation() {
        let mut db = Db::open_in_memory().unwrap();
        let id = create(&mut db, "backup");
        handle_request(&mut db, &server(), Request::RunNow(id), "alice");

        let params = AuditParams {
            operation_types: Some(OperationType::Execute),
            ..AuditParams::default()
        };
        match handle_request(&mut db, &server(), Request::GetAuditLog { jobid: id, params }, "root") {
            Response::AuditLog(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].operation_user, "alice");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_audit_log_rejects_reversed_range() {
        let mut db = Db::open_in_memory().unwrap();
        let params = AuditParams {
            operation_types: None,
            date_from: NaiveDate::from_ymd_opt(2025, 2, 1),
            date_to: NaiveDate::from_ymd_opt(2025, 1, 1),
        };
        assert!(matches!(
            handle_request(&mut db, &server(), Request::GetAuditLog { jobid: JobId(1), params }, "root"),
            Response::Error(_)
        ));
    }

    #[test]
    fn test_update_then_get() {
        let mut db = Db::open_in_memory().unwrap();
        let id = create(&mut db, "backup");

        let request = Request::UpdateJob {
            jobid: id,
            payload: payload("backup-v2"),
        };
        assert!(matches!(handle_request(&mut db, &server(), request, "root"), Response::Ok));
        match handle_request(&mut db, &server(), Request::GetJob(id), "root") {
            Response::JobDetail(Some(job)) => assert_eq!(job.jobname, "backup-v2"),
            other => panic!("unexpected response {:?}", other),
        }
    }
}
