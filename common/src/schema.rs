//! Field descriptors for the job entity and its nested collections.
//!
//! Each attribute is described exactly once; the modes it appears in and
//! how it behaves in each of them live on the descriptor itself. A renderer
//! walks `JobSchema::fields` for the mode it is showing, and `JobDraft`
//! holds the pending edits of one editing session.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use serde_json::Value;

use crate::audit::{self, AuditColumn, AUDIT_LOG_RESOURCE};
use crate::error::{Result, ValidationError};
use crate::job::{Job, JobClass, JobId, JobPayload, DEFAULT_JOB_CLASS};
use crate::schedule::{JobSchedule, ScheduleSchema};
use crate::step::{JobStep, StepSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    Properties,
    Create,
    Edit,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Properties, Mode::Create, Mode::Edit];
    pub const EDITING: [Mode; 2] = [Mode::Create, Mode::Edit];
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeBehavior {
    pub readonly: bool,
    pub help: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: i64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionSource {
    /// Rows travel with the parent record.
    Inline,
    /// Rows are fetched on their own from a sub-resource of the parent.
    SubResource(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    Numeric,
    Lexicographic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub columns: &'static [&'static str],
    pub can_add: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub source: CollectionSource,
    pub sort_columns: Vec<(&'static str, SortKind)>,
}

impl CollectionSpec {
    pub fn editable(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            can_add: true,
            can_edit: true,
            can_delete: true,
            source: CollectionSource::Inline,
            sort_columns: Vec::new(),
        }
    }

    pub fn read_only(columns: &'static [&'static str], resource: &'static str) -> Self {
        Self {
            columns,
            can_add: false,
            can_edit: false,
            can_delete: false,
            source: CollectionSource::SubResource(resource),
            sort_columns: Vec::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        !(self.can_add || self.can_edit || self.can_delete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
    Switch,
    Select(Vec<SelectOption>),
    Multiline,
    StructuredText,
    Collection(CollectionSpec),
}

/// How a raw value is turned into display text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formatter {
    Raw,
    /// Shown instead of a missing or empty value.
    Fallback(&'static str),
    PrettyJson,
}

impl Formatter {
    pub fn format(&self, value: &Value) -> String {
        match self {
            Formatter::Raw => display_value(value),
            Formatter::Fallback(text) => {
                if is_blank(value) {
                    text.to_string()
                } else {
                    display_value(value)
                }
            }
            Formatter::PrettyJson => audit::pretty_json(Some(value)),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub group: Option<&'static str>,
    pub modes: BTreeMap<Mode, ModeBehavior>,
    pub required: bool,
    pub formatter: Formatter,
}

impl FieldDescriptor {
    /// A field shown and editable in every mode. Properties is always a
    /// read-only view.
    pub fn new(id: &'static str, label: &'static str, kind: FieldKind) -> Self {
        let modes = Mode::ALL
            .iter()
            .map(|&mode| {
                let behavior = ModeBehavior {
                    readonly: mode == Mode::Properties,
                    help: None,
                };
                (mode, behavior)
            })
            .collect();

        Self {
            id,
            label,
            kind,
            group: None,
            modes,
            required: false,
            formatter: Formatter::Raw,
        }
    }

    pub fn only(mut self, modes: &[Mode]) -> Self {
        self.modes.retain(|mode, _| modes.contains(mode));
        self
    }

    pub fn readonly(mut self) -> Self {
        for behavior in self.modes.values_mut() {
            behavior.readonly = true;
        }
        self
    }

    /// Help text shown while creating or editing.
    pub fn help(mut self, text: &'static str) -> Self {
        for mode in Mode::EDITING {
            if let Some(behavior) = self.modes.get_mut(&mode) {
                behavior.help = Some(text);
            }
        }
        self
    }

    pub fn group(mut self, group: &'static str) -> Self {
        self.group = Some(group);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn behavior(&self, mode: Mode) -> Option<&ModeBehavior> {
        self.modes.get(&mode)
    }

    pub fn visible_in(&self, mode: Mode) -> bool {
        self.modes.contains_key(&mode)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, FieldKind::Collection(_))
    }

    /// Whether a save in `mode` carries this field.
    pub fn is_submitted_in(&self, mode: Mode) -> bool {
        if mode == Mode::Properties {
            return false;
        }
        let editable = self.behavior(mode).map(|b| !b.readonly).unwrap_or(false);
        let fetched_separately = matches!(
            &self.kind,
            FieldKind::Collection(spec) if spec.source != CollectionSource::Inline
        );
        editable && !fetched_separately
    }

    pub fn display(&self, value: &Value) -> String {
        if let FieldKind::Select(options) = &self.kind {
            if let Some(option) = value
                .as_i64()
                .and_then(|v| options.iter().find(|o| o.value == v))
            {
                return option.label.clone();
            }
        }
        self.formatter.format(value)
    }
}

/// Schema of a row inside an editable collection.
pub trait RowSchema {
    type Row;

    fn columns(&self) -> &'static [&'static str];

    fn validate_row(&self, row: &Self::Row) -> std::result::Result<(), ValidationError>;

    /// Value that must be unique among the rows of one parent.
    fn row_key<'r>(&self, _row: &'r Self::Row) -> Option<&'r str> {
        None
    }
}

/// Ordered rows of a nested collection, pending until the parent is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    field: &'static str,
    rows: Vec<T>,
}

impl<T> Collection<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(field: &'static str, rows: Vec<T>) -> Self {
        Self { field, rows }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn add<S>(&mut self, schema: &S, row: T) -> std::result::Result<usize, ValidationError>
    where
        S: RowSchema<Row = T>,
    {
        let index = self.rows.len();
        self.check_row(schema, &row, None)
            .map_err(|e| e.in_row(index))?;
        self.rows.push(row);
        Ok(index)
    }

    pub fn update<S>(
        &mut self,
        schema: &S,
        index: usize,
        row: T,
    ) -> std::result::Result<(), ValidationError>
    where
        S: RowSchema<Row = T>,
    {
        if index >= self.rows.len() {
            return Err(ValidationError::new(
                self.field,
                format!("Row {} does not exist.", index),
            ));
        }
        self.check_row(schema, &row, Some(index))
            .map_err(|e| e.in_row(index))?;
        self.rows[index] = row;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index < self.rows.len() {
            Some(self.rows.remove(index))
        } else {
            None
        }
    }

    pub fn validate<S>(&self, schema: &S) -> std::result::Result<(), ValidationError>
    where
        S: RowSchema<Row = T>,
    {
        for (index, row) in self.rows.iter().enumerate() {
            schema.validate_row(row).map_err(|e| e.in_row(index))?;
        }

        let mut seen = HashSet::new();
        for (index, row) in self.rows.iter().enumerate() {
            if let Some(key) = schema.row_key(row) {
                if !seen.insert(key) {
                    return Err(duplicate_key(schema, key).in_row(index));
                }
            }
        }
        Ok(())
    }

    fn check_row<S>(
        &self,
        schema: &S,
        row: &T,
        skip: Option<usize>,
    ) -> std::result::Result<(), ValidationError>
    where
        S: RowSchema<Row = T>,
    {
        schema.validate_row(row)?;
        if let Some(key) = schema.row_key(row) {
            let taken = self
                .rows
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != skip)
                .any(|(_, other)| schema.row_key(other) == Some(key));
            if taken {
                return Err(duplicate_key(schema, key));
            }
        }
        Ok(())
    }
}

fn duplicate_key<S: RowSchema>(schema: &S, key: &str) -> ValidationError {
    let column = schema.columns().first().copied().unwrap_or("name");
    ValidationError::new(column, format!("'{}' is already used by another row.", key))
}

/// Option lists supplied by the server the job lives on.
#[derive(Debug, Clone, Default)]
pub struct JobFieldOptions {
    pub job_classes: Vec<JobClass>,
}

type StepSchemaFactory = Box<dyn Fn() -> StepSchema + Send + Sync>;

pub struct JobSchema {
    options: JobFieldOptions,
    step_schema_factory: StepSchemaFactory,
    step_schema: OnceLock<StepSchema>,
    schedule_schema: ScheduleSchema,
}

impl std::fmt::Debug for JobSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSchema")
            .field("options", &self.options)
            .field("step_schema", &self.step_schema.get())
            .finish()
    }
}

impl JobSchema {
    /// The step schema depends on server context that may not be known yet,
    /// so it is built by `step_schema` the first time it is needed.
    pub fn new<F>(options: JobFieldOptions, step_schema: F) -> Self
    where
        F: Fn() -> StepSchema + Send + Sync + 'static,
    {
        Self {
            options,
            step_schema_factory: Box::new(step_schema),
            step_schema: OnceLock::new(),
            schedule_schema: ScheduleSchema,
        }
    }

    pub fn id_attribute(&self) -> &'static str {
        "jobid"
    }

    pub fn job_classes(&self) -> &[JobClass] {
        &self.options.job_classes
    }

    pub fn step_schema(&self) -> &StepSchema {
        self.step_schema.get_or_init(|| (self.step_schema_factory)())
    }

    pub fn schedule_schema(&self) -> &ScheduleSchema {
        &self.schedule_schema
    }

    pub fn fields(&self) -> Vec<FieldDescriptor> {
        let classes = self
            .options
            .job_classes
            .iter()
            .map(|c| SelectOption {
                value: c.jclid,
                label: c.jclname.clone(),
            })
            .collect();

        let mut audit_logs = CollectionSpec::read_only(AuditLogSchema::COLUMNS, AUDIT_LOG_RESOURCE);
        audit_logs.sort_columns = AuditColumn::ALL
            .iter()
            .map(|c| (c.id(), c.sort_kind()))
            .collect();

        vec![
            FieldDescriptor::new("jobname", "Name", FieldKind::Text).required(),
            FieldDescriptor::new("jobid", "ID", FieldKind::Int)
                .only(&[Mode::Properties])
                .readonly(),
            FieldDescriptor::new("jobenabled", "Enabled?", FieldKind::Switch),
            FieldDescriptor::new("jobjclid", "Job class", FieldKind::Select(classes)).help(
                "Please select a class to categorize the job. This option will not affect the way the job runs.",
            ),
            FieldDescriptor::new("jobhostagent", "Host agent", FieldKind::Text).help(
                "Enter the hostname of a machine running pgAgent if you wish to ensure only that machine will run this job. Leave blank if any host may run the job.",
            ),
            FieldDescriptor::new("jobcreated", "Created", FieldKind::Text)
                .only(&[Mode::Properties])
                .readonly(),
            FieldDescriptor::new("jobchanged", "Changed", FieldKind::Text)
                .only(&[Mode::Properties])
                .readonly(),
            FieldDescriptor::new("jobnextrun", "Next run", FieldKind::Text)
                .only(&[Mode::Properties])
                .readonly(),
            FieldDescriptor::new("joblastrun", "Last run", FieldKind::Text)
                .only(&[Mode::Properties])
                .readonly(),
            FieldDescriptor::new("jlgstatus", "Last result", FieldKind::Text)
                .only(&[Mode::Properties])
                .readonly()
                .formatter(Formatter::Fallback("Unknown")),
            FieldDescriptor::new("jobrunningat", "Running at", FieldKind::Text)
                .only(&[Mode::Properties])
                .readonly()
                .formatter(Formatter::Fallback("Not running currently.")),
            FieldDescriptor::new("jobdesc", "Comment", FieldKind::Multiline),
            FieldDescriptor::new(
                "jsteps",
                "",
                FieldKind::Collection(CollectionSpec::editable(self.step_schema().columns())),
            )
            .only(&Mode::EDITING)
            .group("Steps"),
            FieldDescriptor::new(
                "jschedules",
                "",
                FieldKind::Collection(CollectionSpec::editable(self.schedule_schema.columns())),
            )
            .only(&Mode::EDITING)
            .group("Schedules"),
            FieldDescriptor::new("audit_logs", "", FieldKind::Collection(audit_logs))
                .readonly()
                .group("Audit Logs"),
        ]
    }

    pub fn field(&self, id: &str) -> Option<FieldDescriptor> {
        self.fields().into_iter().find(|f| f.id == id)
    }

    pub fn visible_fields(&self, mode: Mode) -> Vec<FieldDescriptor> {
        self.fields()
            .into_iter()
            .filter(|f| f.visible_in(mode))
            .collect()
    }

    /// Ids of the fields a save in `mode` must carry.
    pub fn submitted_fields(&self, mode: Mode) -> Vec<&'static str> {
        self.fields()
            .into_iter()
            .filter(|f| f.is_submitted_in(mode))
            .map(|f| f.id)
            .collect()
    }

    /// Label and display text of every scalar field of the properties view.
    pub fn properties(&self, job: &Job) -> Result<Vec<(&'static str, String)>> {
        let mut values = serde_json::to_value(job)?;
        if let Some(map) = values.as_object_mut() {
            let status = job
                .jlgstatus
                .map(|s| Value::String(s.to_string()))
                .unwrap_or(Value::Null);
            map.insert("jlgstatus".to_string(), status);
        }

        Ok(self
            .visible_fields(Mode::Properties)
            .into_iter()
            .filter(|f| !f.is_collection())
            .map(|f| {
                let value = values.get(f.id).cloned().unwrap_or(Value::Null);
                (f.label, f.display(&value))
            })
            .collect())
    }
}

/// Read-only fields of one audit record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLogSchema;

impl AuditLogSchema {
    pub const COLUMNS: &'static [&'static str] =
        &["audit_id", "operation_type", "operation_time", "operation_user"];

    pub fn fields(&self) -> Vec<FieldDescriptor> {
        let field = |id: &'static str, label: &'static str, kind: FieldKind| {
            FieldDescriptor::new(id, label, kind)
                .only(&[Mode::Properties])
                .readonly()
        };
        vec![
            field("audit_id", "ID", FieldKind::Text),
            field("operation_type", "Operation", FieldKind::Text),
            field("operation_time", "Time", FieldKind::Text),
            field("operation_user", "User", FieldKind::Text),
            field("old_values", "Old Values", FieldKind::StructuredText)
                .formatter(Formatter::PrettyJson),
            field("new_values", "New Values", FieldKind::StructuredText)
                .formatter(Formatter::PrettyJson),
            field("additional_info", "Additional Info", FieldKind::Text),
        ]
    }
}

/// Pending edits of one create or edit session.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDraft {
    mode: Mode,
    jobid: Option<JobId>,
    pub jobname: String,
    pub jobenabled: bool,
    pub jobhostagent: String,
    pub jobjclid: i64,
    pub jobdesc: String,
    pub jsteps: Collection<JobStep>,
    pub jschedules: Collection<JobSchedule>,
}

impl JobDraft {
    pub fn create() -> Self {
        Self {
            mode: Mode::Create,
            jobid: None,
            jobname: String::new(),
            jobenabled: true,
            jobhostagent: String::new(),
            jobjclid: DEFAULT_JOB_CLASS,
            jobdesc: String::new(),
            jsteps: Collection::new("jsteps"),
            jschedules: Collection::new("jschedules"),
        }
    }

    pub fn edit(job: &Job) -> Self {
        Self {
            mode: Mode::Edit,
            jobid: job.jobid,
            jobname: job.jobname.clone(),
            jobenabled: job.jobenabled,
            jobhostagent: job.jobhostagent.clone(),
            jobjclid: job.jobjclid,
            jobdesc: job.jobdesc.clone(),
            jsteps: Collection::from_rows("jsteps", job.jsteps.clone()),
            jschedules: Collection::from_rows("jschedules", job.jschedules.clone()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn jobid(&self) -> Option<JobId> {
        self.jobid
    }

    pub fn validate(&self, schema: &JobSchema) -> std::result::Result<(), ValidationError> {
        if self.jobname.trim().is_empty() {
            return Err(ValidationError::new("jobname", "'Name' cannot be empty."));
        }

        let classes = schema.job_classes();
        if !classes.is_empty() && !classes.iter().any(|c| c.jclid == self.jobjclid) {
            return Err(ValidationError::new("jobjclid", "Please select a valid job class."));
        }

        self.jsteps.validate(schema.step_schema())?;
        self.jschedules.validate(schema.schedule_schema())?;
        Ok(())
    }

    /// Validates the draft and returns what a save submits: every editable
    /// scalar and the full current step and schedule collections.
    pub fn save_payload(&self, schema: &JobSchema) -> std::result::Result<JobPayload, ValidationError> {
        self.validate(schema)?;
        Ok(JobPayload {
            jobname: self.jobname.trim().to_string(),
            jobenabled: self.jobenabled,
            jobhostagent: self.jobhostagent.trim().to_string(),
            jobjclid: self.jobjclid,
            jobdesc: self.jobdesc.clone(),
            jsteps: self.jsteps.rows().to_vec(),
            jschedules: self.jschedules.rows().to_vec(),
        })
    }
}
