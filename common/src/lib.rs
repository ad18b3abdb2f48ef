pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod ipc;
pub mod job;
pub mod schedule;
pub mod schema;
pub mod step;
pub mod tree;

pub use audit::{AuditFilter, AuditLogEntry, AuditParams, OperationType};
pub use dispatcher::{
    AuditLogVariant, Clipboard, EditSession, JobActionDispatcher, Notifier, QueryTool, Selection,
    Transport,
};
pub use error::{Error, Result, SelectionError, ValidationError};
pub use ipc::{Request, Response, ServerInfo};
pub use job::{Job, JobClass, JobId, JobPayload, JobRunStatus, JobSummary};
pub use schedule::JobSchedule;
pub use schema::{JobDraft, JobSchema, Mode};
pub use step::{ConnType, JobStep, OnError, StepKind};
pub use tree::{BrowserTree, ItemData, MemoryTree, NodeKind, TreeItem};

// Production paths (follow FHS - Filesystem Hierarchy Standard)
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/pgajob/pgajob.sock";
pub const DEFAULT_DB_PATH: &str = "/var/lib/pgajob/pgagent.db";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pgajob/config.yaml";
pub const DEFAULT_LOG_FILE: &str = "/var/log/pgajob/daemon.log";

// Fallback paths for non-root users
pub const USER_SOCKET_PATH: &str = "/tmp/pgajob.sock";
pub const USER_DB_PATH: &str = "pgagent.db";
pub const USER_LOG_FILE: &str = "pgajob-daemon.log";
