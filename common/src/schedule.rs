use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schema::RowSchema;

fn default_true() -> bool {
    true
}

/// A window during which the agent may start the owning job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jscid: Option<i64>,
    pub jscname: String,
    #[serde(default)]
    pub jscdesc: String,
    #[serde(default = "default_true")]
    pub jscenabled: bool,
    pub jscstart: DateTime<Utc>,
    #[serde(default)]
    pub jscend: Option<DateTime<Utc>>,
}

impl JobSchedule {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            jscid: None,
            jscname: name.into(),
            jscdesc: String::new(),
            jscenabled: true,
            jscstart: start,
            jscend: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleSchema;

impl RowSchema for ScheduleSchema {
    type Row = JobSchedule;

    fn columns(&self) -> &'static [&'static str] {
        &["jscname", "jscenabled", "jscstart", "jscend"]
    }

    fn validate_row(&self, schedule: &JobSchedule) -> Result<(), ValidationError> {
        if schedule.jscname.trim().is_empty() {
            return Err(ValidationError::new("jscname", "Name cannot be empty."));
        }
        if let Some(end) = schedule.jscend {
            if end < schedule.jscstart {
                return Err(ValidationError::new(
                    "jscend",
                    "End time cannot be earlier than the start time.",
                ));
            }
        }
        Ok(())
    }
}
