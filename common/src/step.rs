use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schema::RowSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepKind {
    #[serde(rename = "s")]
    Sql,
    #[serde(rename = "b")]
    Batch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    Local,
    Remote,
}

/// What the agent does when the step fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OnError {
    #[serde(rename = "f")]
    Fail,
    #[serde(rename = "s")]
    Success,
    #[serde(rename = "i")]
    Ignore,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jstid: Option<i64>,
    pub jstname: String,
    #[serde(default)]
    pub jstdesc: String,
    #[serde(default = "default_true")]
    pub jstenabled: bool,
    pub jstkind: StepKind,
    pub jstconntype: ConnType,
    #[serde(default)]
    pub jstdbname: String,
    #[serde(default)]
    pub jstconnstr: String,
    #[serde(default)]
    pub jstcode: String,
    pub jstonerror: OnError,
}

impl JobStep {
    /// A local SQL step that fails the job on error.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            jstid: None,
            jstname: name.into(),
            jstdesc: String::new(),
            jstenabled: true,
            jstkind: StepKind::Sql,
            jstconntype: ConnType::Local,
            jstdbname: String::new(),
            jstconnstr: String::new(),
            jstcode: String::new(),
            jstonerror: OnError::Fail,
        }
    }
}

/// Row schema for job steps. Local SQL steps are checked against the
/// databases known to the owning server.
#[derive(Debug, Clone, Default)]
pub struct StepSchema {
    databases: Vec<String>,
}

impl StepSchema {
    pub fn new(databases: Vec<String>) -> Self {
        Self { databases }
    }

    pub fn databases(&self) -> &[String] {
        &self.databases
    }
}

impl RowSchema for StepSchema {
    type Row = JobStep;

    fn columns(&self) -> &'static [&'static str] {
        &["jstname", "jstenabled", "jstkind", "jstconntype", "jstonerror"]
    }

    fn validate_row(&self, step: &JobStep) -> Result<(), ValidationError> {
        if step.jstname.trim().is_empty() {
            return Err(ValidationError::new("jstname", "Name cannot be empty."));
        }

        if step.jstkind == StepKind::Sql {
            match step.jstconntype {
                ConnType::Local => {
                    if step.jstdbname.is_empty() {
                        return Err(ValidationError::new("jstdbname", "Please select a database."));
                    }
                    if !self.databases.is_empty() && !self.databases.contains(&step.jstdbname) {
                        return Err(ValidationError::new(
                            "jstdbname",
                            format!("Database '{}' does not exist on this server.", step.jstdbname),
                        ));
                    }
                }
                ConnType::Remote => {
                    if step.jstconnstr.trim().is_empty() {
                        return Err(ValidationError::new(
                            "jstconnstr",
                            "Please enter a connection string.",
                        ));
                    }
                }
            }
        }

        if step.jstcode.trim().is_empty() {
            return Err(ValidationError::new("jstcode", "Please specify code to execute."));
        }

        Ok(())
    }

    fn row_key<'r>(&self, step: &'r JobStep) -> Option<&'r str> {
        Some(step.jstname.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_step(name: &str, db: &str) -> JobStep {
        let mut step = JobStep::new(name);
        step.jstdbname = db.to_string();
        step.jstcode = "VACUUM ANALYZE;".to_string();
        step
    }

    #[test]
    fn test_local_sql_step_needs_known_database() {
        let schema = StepSchema::new(vec!["postgres".to_string()]);
        assert!(schema.validate_row(&sql_step("vacuum", "postgres")).is_ok());

        let err = schema.validate_row(&sql_step("vacuum", "missing")).unwrap_err();
        assert_eq!(err.field, "jstdbname");

        let err = schema.validate_row(&sql_step("vacuum", "")).unwrap_err();
        assert_eq!(err.message, "Please select a database.");
    }

    #[test]
    fn test_any_database_accepted_without_server_list() {
        let schema = StepSchema::default();
        assert!(schema.validate_row(&sql_step("vacuum", "whatever")).is_ok());
    }

    #[test]
    fn test_remote_step_needs_connection_string() {
        let schema = StepSchema::default();
        let mut step = sql_step("remote", "");
        step.jstconntype = ConnType::Remote;
        assert_eq!(schema.validate_row(&step).unwrap_err().field, "jstconnstr");

        step.jstconnstr = "host=db1 dbname=app".to_string();
        assert!(schema.validate_row(&step).is_ok());
    }

    #[test]
    fn test_batch_step_ignores_connection() {
        let schema = StepSchema::new(vec!["postgres".to_string()]);
        let mut step = JobStep::new("rotate");
        step.jstkind = StepKind::Batch;
        step.jstcode = "logrotate /etc/logrotate.conf".to_string();
        assert!(schema.validate_row(&step).is_ok());

        step.jstcode.clear();
        assert_eq!(schema.validate_row(&step).unwrap_err().field, "jstcode");
    }

    #[test]
    fn test_step_wire_codes() {
        let mut step = sql_step("vacuum", "postgres");
        step.jstonerror = OnError::Ignore;
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["jstkind"], "s");
        assert_eq!(value["jstconntype"], "local");
        assert_eq!(value["jstonerror"], "i");
        assert!(value.get("jstid").is_none());
    }
}
