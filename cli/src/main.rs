mod browser;
mod input;
mod render;
mod terminal;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use common::audit::{sort_entries, AuditColumn, SortDirection};
use common::schema::{FieldKind, JobFieldOptions, JobSchema, Mode};
use common::step::StepSchema;
use common::{
    AuditFilter, Clipboard, JobActionDispatcher, JobId, MemoryTree, Request,
    Response, Transport,
};
use terminal::{ClipboardTarget, QueryToolLauncher, TerminalNotifier};
use transport::SocketTransport;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Daemon socket
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// List all jobs
    List,
    /// Show a job's properties, steps and schedules
    Show {
        jobid: i64,
    },
    /// Create a new job
    Create {
        #[arg(short, long)]
        name: String,
        /// Create the job disabled
        #[arg(long)]
        disabled: bool,
        /// Job class id
        #[arg(long)]
        class: Option<i64>,
        #[arg(long)]
        host_agent: Option<String>,
        #[arg(short, long)]
        comment: Option<String>,
        /// Step spec, e.g. "name=vacuum,db=postgres,code=VACUUM;"
        #[arg(long = "step")]
        steps: Vec<String>,
        /// Schedule spec, e.g. "name=nightly,start=2025-01-01 02:00"
        #[arg(long = "schedule")]
        schedules: Vec<String>,
    },
    /// Change an existing job
    Edit {
        jobid: i64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        class: Option<i64>,
        #[arg(long)]
        host_agent: Option<String>,
        #[arg(short, long)]
        comment: Option<String>,
        /// Add a step
        #[arg(long = "step")]
        steps: Vec<String>,
        /// Remove the step with this name
        #[arg(long = "remove-step")]
        remove_steps: Vec<String>,
        /// Add a schedule
        #[arg(long = "schedule")]
        schedules: Vec<String>,
        /// Remove the schedule with this name
        #[arg(long = "remove-schedule")]
        remove_schedules: Vec<String>,
    },
    /// Run a job now
    RunNow {
        jobid: i64,
    },
    /// Drop a job
    Drop {
        jobid: i64,
    },
    /// Show a job's audit log
    AuditLog {
        jobid: i64,
        /// CREATE, MODIFY or EXECUTE
        #[arg(long)]
        operation: Option<String>,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: Option<String>,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        to: Option<String>,
        /// audit_id, operation_type, operation_time or operation_user
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Copy the audit log query for the query tool
    AuditQuery {
        /// CREATE, MODIFY, DELETE or EXECUTE; all operations when omitted
        #[arg(long)]
        operation: Option<String>,
        /// Write the query to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Command run with the server name to open a query tool
        #[arg(long, env = "PGAJOB_QUERY_TOOL")]
        query_tool: Option<String>,
    },
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

struct App {
    transport: Arc<SocketTransport>,
    tree: Arc<MemoryTree>,
    dispatcher: JobActionDispatcher,
}

impl App {
    async fn connect(socket: PathBuf, clipboard: ClipboardTarget, query_tool: QueryToolLauncher) -> anyhow::Result<Self> {
        let transport = Arc::new(SocketTransport::new(socket));
        let tree = Arc::new(browser::load_tree(transport.as_ref()).await?);
        let clipboard: Arc<dyn Clipboard> = Arc::new(clipboard);
        let dispatcher = JobActionDispatcher::new(
            tree.clone(),
            transport.clone(),
            Arc::new(TerminalNotifier),
            clipboard,
            Arc::new(query_tool),
        );
        Ok(Self {
            transport,
            tree,
            dispatcher,
        })
    }

    fn select_job(&self, jobid: i64) -> anyhow::Result<()> {
        let node = browser::job_node(&self.tree, JobId(jobid))?;
        self.tree.select(Some(node));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(SocketTransport::default_path);

    let (clipboard, query_tool) = match &cli.command {
        Commands::AuditQuery { output, query_tool, .. } => (
            output.clone().map(ClipboardTarget::File).unwrap_or(ClipboardTarget::Stdout),
            QueryToolLauncher::new(query_tool.clone()),
        ),
        _ => (ClipboardTarget::Stdout, QueryToolLauncher::new(None)),
    };
    let app = App::connect(socket, clipboard, query_tool).await?;

    let ok = match cli.command {
        Commands::List => list(&app).await?,
        Commands::Show { jobid } => show(&app, JobId(jobid)).await?,
        Commands::Create {
            name,
            disabled,
            class,
            host_agent,
            comment,
            steps,
            schedules,
        } => {
            app.tree.select(Some(browser::job_collection(&app.tree)?));
            let Some(mut session) = app.dispatcher.create().await else {
                return Ok(ExitCode::FAILURE);
            };
            let draft = &mut session.draft;
            draft.jobname = name;
            draft.jobenabled = !disabled;
            if let Some(class) = class {
                draft.jobjclid = class;
            }
            draft.jobhostagent = host_agent.unwrap_or_default();
            draft.jobdesc = comment.unwrap_or_default();
            for spec in &steps {
                draft.jsteps.add(session.schema.step_schema(), input::parse_step(spec)?)?;
            }
            for spec in &schedules {
                draft.jschedules.add(session.schema.schedule_schema(), input::parse_schedule(spec)?)?;
            }
            app.dispatcher.save(&session).await.is_ok()
        }
        Commands::Edit {
            jobid,
            name,
            enabled,
            class,
            host_agent,
            comment,
            steps,
            remove_steps,
            schedules,
            remove_schedules,
        } => {
            app.select_job(jobid)?;
            let Some(mut session) = app.dispatcher.edit().await else {
                return Ok(ExitCode::FAILURE);
            };
            let draft = &mut session.draft;
            if let Some(name) = name {
                draft.jobname = name;
            }
            if let Some(enabled) = enabled {
                draft.jobenabled = enabled;
            }
            if let Some(class) = class {
                draft.jobjclid = class;
            }
            if let Some(host_agent) = host_agent {
                draft.jobhostagent = host_agent;
            }
            if let Some(comment) = comment {
                draft.jobdesc = comment;
            }
            for name in &remove_steps {
                let index = draft
                    .jsteps
                    .rows()
                    .iter()
                    .position(|s| &s.jstname == name)
                    .ok_or_else(|| anyhow!("No step named '{}'", name))?;
                draft.jsteps.remove(index);
            }
            for name in &remove_schedules {
                let index = draft
                    .jschedules
                    .rows()
                    .iter()
                    .position(|s| &s.jscname == name)
                    .ok_or_else(|| anyhow!("No schedule named '{}'", name))?;
                draft.jschedules.remove(index);
            }
            for spec in &steps {
                draft.jsteps.add(session.schema.step_schema(), input::parse_step(spec)?)?;
            }
            for spec in &schedules {
                draft.jschedules.add(session.schema.schedule_schema(), input::parse_schedule(spec)?)?;
            }
            app.dispatcher.save(&session).await.is_ok()
        }
        Commands::RunNow { jobid } => {
            app.select_job(jobid)?;
            app.dispatcher.run_now().await
        }
        Commands::Drop { jobid } => {
            app.select_job(jobid)?;
            app.dispatcher.drop_job().await
        }
        Commands::AuditLog {
            jobid,
            operation,
            from,
            to,
            sort,
            desc,
            format,
        } => {
            let filter = AuditFilter {
                operation_types: operation,
                date_from: from,
                date_to: to,
            };
            let Some(mut entries) = app.dispatcher.fetch_audit_log(JobId(jobid), &filter).await else {
                return Ok(ExitCode::FAILURE);
            };
            if let Some(column) = sort {
                let column = AuditColumn::from_id(&column)
                    .ok_or_else(|| anyhow!("Cannot sort by '{}'", column))?;
                let direction = if desc {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                };
                sort_entries(&mut entries, column, direction);
            }
            match format {
                OutputFormat::Table => println!("{}", render::audit_table(&entries)?),
                OutputFormat::Csv => render::write_audit_csv(&entries, std::io::stdout())?,
            }
            true
        }
        Commands::AuditQuery { operation, .. } => {
            app.tree.select(Some(browser::job_collection(&app.tree)?));
            app.dispatcher.show_audit_log_for(operation.as_deref())
        }
    };

    Ok(exit_code(ok))
}

async fn list(app: &App) -> anyhow::Result<bool> {
    match app.transport.send(Request::ListJobs).await? {
        Response::JobList(jobs) => {
            println!("{}", render::job_list_table(&jobs));
            Ok(true)
        }
        Response::Error(e) => {
            eprintln!("{}", e);
            Ok(false)
        }
        other => Err(anyhow!("Unexpected response: {:?}", other)),
    }
}

async fn show(app: &App, jobid: JobId) -> anyhow::Result<bool> {
    let job = match app.transport.send(Request::GetJob(jobid)).await? {
        Response::JobDetail(Some(job)) => job,
        Response::JobDetail(None) => {
            eprintln!("Job {} not found.", jobid);
            return Ok(false);
        }
        Response::Error(e) => {
            eprintln!("{}", e);
            return Ok(false);
        }
        other => return Err(anyhow!("Unexpected response: {:?}", other)),
    };
    let job_classes = match app.transport.send(Request::ListJobClasses).await? {
        Response::JobClasses(classes) => classes,
        _ => Vec::new(),
    };

    let schema = JobSchema::new(JobFieldOptions { job_classes }, StepSchema::default);
    println!("{}", render::properties_table(&schema.properties(&job)?));

    for field in schema.visible_fields(Mode::Edit) {
        if let FieldKind::Collection(_) = field.kind {
            match field.id {
                "jsteps" => {
                    println!("{}", field.group.unwrap_or(field.id));
                    println!("{}", render::steps_table(&job.jsteps));
                }
                "jschedules" => {
                    println!("{}", field.group.unwrap_or(field.id));
                    println!("{}", render::schedules_table(&job.jschedules));
                }
                _ => {}
            }
        }
    }
    Ok(true)
}
