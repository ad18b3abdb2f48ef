//! Maps user actions on the browser tree onto the job model, the audit
//! query builder and the external collaborators.
//!
//! Every failure is turned into a notification here; nothing escapes to
//! the caller except save validation errors, which the editor shows inline.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audit::{self, AuditFilter, AuditLogEntry, OperationType};
use crate::error::{Error, Result, SelectionError, ValidationError};
use crate::ipc::{Request, Response};
use crate::job::JobId;
use crate::schema::{JobDraft, JobFieldOptions, JobSchema, Mode};
use crate::step::StepSchema;
use crate::tree::{self, BrowserTree, ItemData, NodeKind, TreeItem};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<()>;
}

/// Query tool scoped to a server; the user pastes query text into it.
pub trait QueryTool: Send + Sync {
    fn open(&self, server: &ItemData) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLogVariant {
    All,
    Create,
    Modify,
    Delete,
    Execute,
}

impl AuditLogVariant {
    pub const ALL: [AuditLogVariant; 5] = [
        AuditLogVariant::All,
        AuditLogVariant::Create,
        AuditLogVariant::Modify,
        AuditLogVariant::Delete,
        AuditLogVariant::Execute,
    ];

    pub fn operation(&self) -> Option<OperationType> {
        match self {
            AuditLogVariant::All => None,
            AuditLogVariant::Create => Some(OperationType::Create),
            AuditLogVariant::Modify => Some(OperationType::Modify),
            AuditLogVariant::Delete => Some(OperationType::Delete),
            AuditLogVariant::Execute => Some(OperationType::Execute),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuditLogVariant::All => "Job Audit Log (All)",
            AuditLogVariant::Create => "Job Audit Log (Create)",
            AuditLogVariant::Modify => "Job Audit Log (Modify)",
            AuditLogVariant::Delete => "Job Audit Log (Delete)",
            AuditLogVariant::Execute => "Job Audit Log (Execute)",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    None,
    Job { item: TreeItem, data: ItemData },
    Collection { item: TreeItem, data: ItemData },
    Other { item: TreeItem, data: ItemData },
}

/// An open create or edit dialog.
#[derive(Debug)]
pub struct EditSession {
    pub schema: JobSchema,
    pub draft: JobDraft,
    refresh: Option<TreeItem>,
}

impl EditSession {
    /// Tree node reloaded once the save goes through.
    pub fn refresh_node(&self) -> Option<TreeItem> {
        self.refresh
    }
}

pub struct JobActionDispatcher {
    tree: Arc<dyn BrowserTree>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    clipboard: Arc<dyn Clipboard>,
    query_tool: Arc<dyn QueryTool>,
}

impl JobActionDispatcher {
    pub fn new(
        tree: Arc<dyn BrowserTree>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        clipboard: Arc<dyn Clipboard>,
        query_tool: Arc<dyn QueryTool>,
    ) -> Self {
        Self {
            tree,
            transport,
            notifier,
            clipboard,
            query_tool,
        }
    }

    pub fn selection(&self) -> Selection {
        let Some(item) = self.tree.selected() else {
            return Selection::None;
        };
        match self.tree.item_data(item) {
            None => Selection::None,
            Some(data) if data.kind == NodeKind::Job => Selection::Job { item, data },
            Some(data) if data.kind.is_collection() => Selection::Collection { item, data },
            Some(data) => Selection::Other { item, data },
        }
    }

    /// Opens a create dialog. Nothing is sent until the session is saved.
    pub async fn create(&self) -> Option<EditSession> {
        match self.try_create().await {
            Ok(session) => Some(session),
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }

    async fn try_create(&self) -> Result<EditSession> {
        let (context, refresh) = match self.selection() {
            Selection::None => (None, None),
            Selection::Job { item, .. } => (Some(item), self.tree.parent(item)),
            Selection::Collection { item, data } if data.kind == NodeKind::JobCollection => {
                (Some(item), Some(item))
            }
            _ => return Err(SelectionError::NotApplicable { action: "create" }.into()),
        };

        let schema = self.job_schema(context).await?;
        Ok(EditSession {
            schema,
            draft: JobDraft::create(),
            refresh,
        })
    }

    /// Opens an edit dialog for the selected job.
    pub async fn edit(&self) -> Option<EditSession> {
        match self.try_edit().await {
            Ok(session) => Some(session),
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }

    async fn try_edit(&self) -> Result<EditSession> {
        let (item, data) = self.selected_job("edit")?;
        let jobid = job_id(&data)?;
        let job = match self.request(Request::GetJob(jobid)).await? {
            Response::JobDetail(Some(job)) => job,
            Response::JobDetail(None) => {
                return Err(Error::transport(format!("Job {} not found.", jobid)))
            }
            _ => return Err(Error::UnexpectedResponse { request: "get_job" }),
        };

        let schema = self.job_schema(Some(item)).await?;
        Ok(EditSession {
            schema,
            draft: JobDraft::edit(&job),
            refresh: Some(item),
        })
    }

    /// Saves the session. A draft that fails validation is reported and
    /// returned as an error without anything being sent.
    pub async fn save(&self, session: &EditSession) -> Result<JobId> {
        let payload = match session.draft.save_payload(&session.schema) {
            Ok(payload) => payload,
            Err(e) => {
                let e = Error::from(e);
                self.report(&e);
                return Err(e);
            }
        };

        let result = match (session.draft.mode(), session.draft.jobid()) {
            (Mode::Edit, Some(jobid)) => match self.request(Request::UpdateJob { jobid, payload }).await {
                Ok(Response::Ok) => Ok(jobid),
                Ok(_) => Err(Error::UnexpectedResponse { request: "update_job" }),
                Err(e) => Err(e),
            },
            (Mode::Edit, None) => {
                Err(ValidationError::new("jobid", "The job has not been created yet.").into())
            }
            _ => match self.request(Request::CreateJob(payload)).await {
                Ok(Response::Created(jobid)) => Ok(jobid),
                Ok(_) => Err(Error::UnexpectedResponse { request: "create_job" }),
                Err(e) => Err(e),
            },
        };

        match &result {
            Ok(jobid) => {
                log::info!("saved job {} ({})", jobid, session.draft.jobname.trim());
                self.notifier
                    .success(&format!("Job '{}' saved.", session.draft.jobname.trim()));
                if let Some(node) = session.refresh {
                    self.tree.unload(node);
                }
            }
            Err(e) => self.report(e),
        }
        result
    }

    /// Asks the server to run the selected job immediately. The job node is
    /// reloaded whether or not the request succeeds.
    pub async fn run_now(&self) -> bool {
        let (item, data) = match self.selected_job("run_now") {
            Ok(selected) => selected,
            Err(e) => {
                self.report(&e);
                return false;
            }
        };

        let done = match job_id(&data) {
            Ok(jobid) => match self.request(Request::RunNow(jobid)).await {
                Ok(Response::RunNow { info }) => {
                    self.notifier.success(&info);
                    true
                }
                Ok(_) => {
                    self.report(&Error::UnexpectedResponse { request: "run_now" });
                    false
                }
                Err(e) => {
                    self.report(&e);
                    false
                }
            },
            Err(e) => {
                self.report(&e);
                false
            }
        };

        self.tree.unload(item);
        done
    }

    /// Drops the selected job and reloads its collection.
    pub async fn drop_job(&self) -> bool {
        let (item, data) = match self.selected_job("drop") {
            Ok(selected) => selected,
            Err(e) => {
                self.report(&e);
                return false;
            }
        };

        let result = match job_id(&data) {
            Ok(jobid) => self.request(Request::DeleteJob(jobid)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(Response::Ok) => {
                self.notifier.success(&format!("Job '{}' dropped.", data.label));
                if let Some(collection) = self.tree.parent(item) {
                    self.tree.unload(collection);
                }
                true
            }
            Ok(_) => {
                self.report(&Error::UnexpectedResponse { request: "delete_job" });
                false
            }
            Err(e) => {
                self.report(&e);
                false
            }
        }
    }

    pub fn show_audit_log(&self, variant: AuditLogVariant) -> bool {
        self.show_audit_log_for(variant.operation().map(|op| op.as_str()))
    }

    /// Copies the audit query for `operation` to the clipboard and opens the
    /// query tool on the server owning the selected collection.
    pub fn show_audit_log_for(&self, operation: Option<&str>) -> bool {
        let server = match self.audit_log_server() {
            Ok(server) => server,
            Err(e) => {
                self.report(&e);
                return false;
            }
        };

        match self.copy_audit_query(&server, operation) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("audit query for {}: {}", server.label, e);
                self.notifier.error(&format!("Error: {}", e));
                false
            }
        }
    }

    fn audit_log_server(&self) -> Result<ItemData> {
        let item = match self.selection() {
            Selection::None => return Err(SelectionError::NoSelection.into()),
            Selection::Collection { item, .. } => item,
            _ => return Err(SelectionError::NotApplicable { action: "show_audit_log" }.into()),
        };
        let (_, server) = tree::resolve_server(self.tree.as_ref(), Some(item))?;
        Ok(server)
    }

    fn copy_audit_query(&self, server: &ItemData, operation: Option<&str>) -> Result<()> {
        let operation = operation.map(OperationType::parse).transpose()?;
        let query = audit::export_query(operation);
        self.clipboard.copy(&query)?;
        self.notifier.success(&audit::copied_message(operation));
        self.query_tool.open(server)
    }

    /// Fetches a job's audit trail through the interactive filter, most
    /// recent first.
    pub async fn fetch_audit_log(&self, jobid: JobId, filter: &AuditFilter) -> Option<Vec<AuditLogEntry>> {
        match self.try_fetch_audit_log(jobid, filter).await {
            Ok(entries) => Some(entries),
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }

    async fn try_fetch_audit_log(&self, jobid: JobId, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let params = filter.params()?;
        match self.request(Request::GetAuditLog { jobid, params }).await? {
            Response::AuditLog(mut entries) => {
                audit::sort_default(&mut entries);
                Ok(entries)
            }
            _ => Err(Error::UnexpectedResponse { request: "get_audit_log" }),
        }
    }

    fn selected_job(&self, action: &'static str) -> Result<(TreeItem, ItemData)> {
        match self.selection() {
            Selection::Job { item, data } => Ok((item, data)),
            Selection::None => Err(SelectionError::NoSelection.into()),
            _ => Err(SelectionError::NotApplicable { action }.into()),
        }
    }

    async fn job_schema(&self, context: Option<TreeItem>) -> Result<JobSchema> {
        let job_classes = match self.request(Request::ListJobClasses).await? {
            Response::JobClasses(classes) => classes,
            _ => return Err(Error::UnexpectedResponse { request: "list_job_classes" }),
        };

        let tree = self.tree.clone();
        Ok(JobSchema::new(JobFieldOptions { job_classes }, move || {
            step_schema_for(tree.as_ref(), context)
        }))
    }

    async fn request(&self, request: Request) -> Result<Response> {
        log::debug!("{} {}", request.name(), request.path());
        match self.transport.send(request).await? {
            Response::Error(message) => Err(Error::Transport(message)),
            response => Ok(response),
        }
    }

    fn report(&self, error: &Error) {
        log::warn!("{}", error);
        let message = match error {
            Error::Validation(e) => match e.row {
                Some(row) => format!("{} (row {}): {}", e.field, row + 1, e.message),
                None => e.to_string(),
            },
            other => other.to_string(),
        };
        self.notifier.error(&message);
    }
}

fn job_id(data: &ItemData) -> Result<JobId> {
    data.id
        .map(JobId)
        .ok_or_else(|| SelectionError::NoSelection.into())
}

/// Steps are checked against the databases of the server owning `context`.
fn step_schema_for(tree: &dyn BrowserTree, context: Option<TreeItem>) -> StepSchema {
    match tree::resolve_server(tree, context) {
        Ok((_, server)) => StepSchema::new(server.string_list("databases")),
        Err(_) => StepSchema::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobClass;
    use crate::schema::Collection;
    use crate::step::JobStep;
    use crate::tree::MemoryTree;
    use std::sync::Mutex;

    type Events = Arc<Mutex<Vec<String>>>;
    type Handler = Box<dyn Fn(&Request) -> Result<Response> + Send + Sync>;

    struct FakeTransport {
        handler: Handler,
        requests: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, request: Request) -> Result<Response> {
            let response = (self.handler)(&request);
            self.requests.lock().unwrap().push(request);
            response
        }
    }

    impl FakeTransport {
        fn names(&self) -> Vec<&'static str> {
            self.requests.lock().unwrap().iter().map(|r| r.name()).collect()
        }
    }

    struct Recorder(Events);

    impl Notifier for Recorder {
        fn success(&self, message: &str) {
            self.0.lock().unwrap().push(format!("success:{}", message));
        }
        fn error(&self, message: &str) {
            self.0.lock().unwrap().push(format!("error:{}", message));
        }
    }

    impl Clipboard for Recorder {
        fn copy(&self, text: &str) -> Result<()> {
            self.0.lock().unwrap().push(format!("copy:{}", text));
            Ok(())
        }
    }

    impl QueryTool for Recorder {
        fn open(&self, server: &ItemData) -> Result<()> {
            self.0.lock().unwrap().push(format!("open:{}", server.label));
            Ok(())
        }
    }

    struct BrokenClipboard;

    impl Clipboard for BrokenClipboard {
        fn copy(&self, _text: &str) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no display").into())
        }
    }

    struct RecordingTree {
        inner: MemoryTree,
        events: Events,
    }

    impl BrowserTree for RecordingTree {
        fn selected(&self) -> Option<TreeItem> {
            self.inner.selected()
        }
        fn item_data(&self, item: TreeItem) -> Option<ItemData> {
            self.inner.item_data(item)
        }
        fn parent(&self, item: TreeItem) -> Option<TreeItem> {
            self.inner.parent(item)
        }
        fn unload(&self, item: TreeItem) {
            let label = self.inner.item_data(item).map(|d| d.label).unwrap_or_default();
            self.events.lock().unwrap().push(format!("unload:{}", label));
            self.inner.unload(item);
        }
    }

    struct Fixture {
        dispatcher: JobActionDispatcher,
        tree: Arc<RecordingTree>,
        transport: Arc<FakeTransport>,
        events: Events,
        jobs: TreeItem,
        job: TreeItem,
        steps: TreeItem,
    }

    fn fixture_with(with_server: bool, clipboard: Option<Arc<dyn Clipboard>>, handler: Handler) -> Fixture {
        let mut inner = MemoryTree::new();
        let root = if with_server {
            let server = inner.add_root(
                ItemData::new(NodeKind::Server, Some(1), "local")
                    .with_attr("databases", serde_json::json!(["postgres"])),
            );
            inner.add_child(server, ItemData::new(NodeKind::JobCollection, None, "pgAgent Jobs"))
        } else {
            inner.add_root(ItemData::new(NodeKind::JobCollection, None, "pgAgent Jobs"))
        };
        let job = inner.add_child(root, ItemData::new(NodeKind::Job, Some(5), "backup"));
        let steps = inner.add_child(job, ItemData::new(NodeKind::StepCollection, None, "Steps"));

        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let tree = Arc::new(RecordingTree {
            inner,
            events: events.clone(),
        });
        let transport = Arc::new(FakeTransport {
            handler,
            requests: Mutex::new(Vec::new()),
        });
        let recorder = Arc::new(Recorder(events.clone()));
        let clipboard: Arc<dyn Clipboard> = match clipboard {
            Some(clipboard) => clipboard,
            None => recorder.clone(),
        };

        let dispatcher = JobActionDispatcher::new(
            tree.clone(),
            transport.clone(),
            recorder.clone(),
            clipboard,
            recorder,
        );

        Fixture {
            dispatcher,
            tree,
            transport,
            events,
            jobs: root,
            job,
            steps,
        }
    }

    fn fixture(handler: Handler) -> Fixture {
        fixture_with(true, None, handler)
    }

    fn server(request: &Request) -> Result<Response> {
        match request {
            Request::ListJobClasses => Ok(Response::JobClasses(vec![JobClass {
                jclid: 1,
                jclname: "Routine Maintenance".to_string(),
            }])),
            Request::RunNow(_) => Ok(Response::RunNow {
                info: "Job 'backup' is scheduled to run now.".to_string(),
            }),
            Request::CreateJob(_) => Ok(Response::Created(JobId(11))),
            _ => Ok(Response::Ok),
        }
    }

    impl Fixture {
        fn select(&self, item: Option<TreeItem>) {
            self.tree.inner.select(item);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_run_now_success_reloads_job() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.job));

        assert!(fx.dispatcher.run_now().await);
        assert_eq!(
            fx.events(),
            vec![
                "success:Job 'backup' is scheduled to run now.".to_string(),
                "unload:backup".to_string(),
            ]
        );
        assert_eq!(fx.transport.names(), vec!["run_now"]);
    }

    #[tokio::test]
    async fn test_run_now_failure_still_reloads_job() {
        let fx = fixture(Box::new(|_: &Request| Err(Error::transport("connection refused"))));
        fx.select(Some(fx.job));

        assert!(!fx.dispatcher.run_now().await);
        assert_eq!(
            fx.events(),
            vec!["error:connection refused".to_string(), "unload:backup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_now_server_error_response() {
        let fx = fixture(Box::new(|_: &Request| Ok(Response::Error("pgAgent is not installed".to_string()))));
        fx.select(Some(fx.job));

        assert!(!fx.dispatcher.run_now().await);
        assert_eq!(
            fx.events(),
            vec!["error:pgAgent is not installed".to_string(), "unload:backup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_now_needs_job_selection() {
        let fx = fixture(Box::new(server));
        assert!(!fx.dispatcher.run_now().await);
        assert_eq!(fx.events(), vec!["error:No item selected.".to_string()]);

        fx.select(Some(fx.jobs));
        assert!(!fx.dispatcher.run_now().await);
        assert!(fx.events()[1].contains("not available"));
        assert!(fx.transport.names().is_empty());
    }

    #[test]
    fn test_show_delete_audit_log() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.steps));

        assert!(fx.dispatcher.show_audit_log(AuditLogVariant::Delete));
        let events = fx.events();
        assert_eq!(
            events,
            vec![
                "copy:SELECT * FROM pgagent.pga_job_audit_log WHERE operation_type = 'DELETE' ORDER BY operation_time DESC;".to_string(),
                "success:SQL query for DELETE operations copied to clipboard. Paste into the query tool and execute.".to_string(),
                "open:local".to_string(),
            ]
        );
        assert_eq!(events.iter().filter(|e| e.starts_with("success:")).count(), 1);
    }

    #[test]
    fn test_show_all_audit_log() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.jobs));

        assert!(fx.dispatcher.show_audit_log(AuditLogVariant::All));
        assert_eq!(
            fx.events()[0],
            "copy:SELECT * FROM pgagent.pga_job_audit_log ORDER BY operation_time DESC;"
        );
        assert!(fx.events()[1].contains("for All operations"));
    }

    #[test]
    fn test_show_audit_log_without_server() {
        let fx = fixture_with(false, None, Box::new(server));
        fx.select(Some(fx.steps));

        assert!(!fx.dispatcher.show_audit_log(AuditLogVariant::Create));
        assert_eq!(fx.events(), vec!["error:Could not find server node.".to_string()]);
    }

    #[test]
    fn test_show_audit_log_needs_collection() {
        let fx = fixture(Box::new(server));
        assert!(!fx.dispatcher.show_audit_log(AuditLogVariant::All));
        assert_eq!(fx.events(), vec!["error:No item selected.".to_string()]);

        fx.select(Some(fx.job));
        assert!(!fx.dispatcher.show_audit_log(AuditLogVariant::All));
        assert_eq!(fx.events().len(), 2);
        assert!(!fx.events().iter().any(|e| e.starts_with("copy:")));
    }

    #[test]
    fn test_show_audit_log_rejects_unknown_operation() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.jobs));

        assert!(!fx.dispatcher.show_audit_log_for(Some("TRUNCATE")));
        assert_eq!(
            fx.events(),
            vec!["error:Error: Invalid operation type: TRUNCATE".to_string()]
        );
    }

    #[test]
    fn test_clipboard_failure_reported() {
        let fx = fixture_with(true, Some(Arc::new(BrokenClipboard)), Box::new(server));
        fx.select(Some(fx.jobs));

        assert!(!fx.dispatcher.show_audit_log(AuditLogVariant::Modify));
        let events = fx.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error:Error: "));
        assert!(events[0].contains("no display"));
    }

    #[tokio::test]
    async fn test_save_rejects_empty_name_before_sending() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.jobs));

        let session = fx.dispatcher.create().await.unwrap();
        assert_eq!(session.draft.jobname, "");
        match fx.dispatcher.save(&session).await {
            Err(Error::Validation(e)) => assert_eq!(e.field, "jobname"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fx.transport.names(), vec!["list_job_classes"]);
        assert_eq!(fx.events(), vec!["error:jobname: 'Name' cannot be empty.".to_string()]);
    }

    #[tokio::test]
    async fn test_save_reports_invalid_step_row() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.jobs));

        let mut session = fx.dispatcher.create().await.unwrap();
        session.draft.jobname = "reindex".to_string();
        let mut valid = JobStep::new("reindex");
        valid.jstdbname = "postgres".to_string();
        valid.jstcode = "REINDEX DATABASE postgres;".to_string();
        let mut no_database = JobStep::new("analyze");
        no_database.jstcode = "ANALYZE;".to_string();
        session.draft.jsteps = Collection::from_rows("jsteps", vec![valid, no_database]);

        match fx.dispatcher.save(&session).await {
            Err(Error::Validation(e)) => assert_eq!(e.row, Some(1)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fx.transport.names(), vec!["list_job_classes"]);
        let events = fx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], "error:jstdbname (row 2): Please select a database.");
    }

    #[tokio::test]
    async fn test_save_new_job() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.jobs));

        let mut session = fx.dispatcher.create().await.unwrap();
        session.draft.jobname = "reindex".to_string();
        let mut step = JobStep::new("reindex");
        step.jstdbname = "postgres".to_string();
        step.jstcode = "REINDEX DATABASE postgres;".to_string();
        session
            .draft
            .jsteps
            .add(session.schema.step_schema(), step)
            .unwrap();

        assert_eq!(fx.dispatcher.save(&session).await.unwrap(), JobId(11));
        assert_eq!(fx.transport.names(), vec!["list_job_classes", "create_job"]);

        let requests = fx.transport.requests.lock().unwrap();
        match &requests[1] {
            Request::CreateJob(payload) => {
                assert_eq!(payload.jobname, "reindex");
                assert_eq!(payload.jsteps.len(), 1);
                assert!(payload.jschedules.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            fx.events(),
            vec!["success:Job 'reindex' saved.".to_string(), "unload:pgAgent Jobs".to_string()]
        );
    }

    #[tokio::test]
    async fn test_step_schema_uses_server_databases() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.jobs));

        let mut session = fx.dispatcher.create().await.unwrap();
        let mut step = JobStep::new("reindex");
        step.jstdbname = "analytics".to_string();
        step.jstcode = "SELECT 1;".to_string();

        let err = session
            .draft
            .jsteps
            .add(session.schema.step_schema(), step)
            .unwrap_err();
        assert_eq!(err.field, "jstdbname");
        assert_eq!(session.schema.step_schema().databases().to_vec(), vec!["postgres".to_string()]);
    }

    #[tokio::test]
    async fn test_create_not_offered_on_step_collection() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.steps));

        assert!(fx.dispatcher.create().await.is_none());
        assert!(fx.transport.names().is_empty());
        assert_eq!(fx.events().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_audit_log_sends_supplied_filters() {
        let fx = fixture(Box::new(|request: &Request| match request {
            Request::GetAuditLog { .. } => Ok(Response::AuditLog(vec![])),
            _ => Ok(Response::Ok),
        }));

        let filter = AuditFilter::operation(OperationType::Execute);
        let entries = fx.dispatcher.fetch_audit_log(JobId(5), &filter).await.unwrap();
        assert!(entries.is_empty());

        let requests = fx.transport.requests.lock().unwrap();
        match &requests[0] {
            Request::GetAuditLog { jobid, params } => {
                assert_eq!(*jobid, JobId(5));
                assert_eq!(params.operation_types, Some(OperationType::Execute));
                assert_eq!(params.date_from, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_audit_log_bad_filter() {
        let fx = fixture(Box::new(server));
        let filter = AuditFilter::date_range(Some("yesterday"), None);

        assert!(fx.dispatcher.fetch_audit_log(JobId(5), &filter).await.is_none());
        assert!(fx.transport.names().is_empty());
        assert_eq!(fx.events(), vec!["error:Invalid filter value for date_from: yesterday".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_job_reloads_collection() {
        let fx = fixture(Box::new(server));
        fx.select(Some(fx.job));

        assert!(fx.dispatcher.drop_job().await);
        assert_eq!(
            fx.events(),
            vec!["success:Job 'backup' dropped.".to_string(), "unload:pgAgent Jobs".to_string()]
        );
    }
}
