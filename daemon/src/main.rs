mod config;
mod db;
mod handler;
mod migrations;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use common::ipc::{decode, encode};
use common::{Request, Response, ServerInfo};
use config::{Config, LoggingConfig};
use db::Db;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Parser)]
#[command(name = "pgajob-daemon")]
#[command(about = "Serves the pgAgent job catalog over a Unix socket", long_about = None)]
struct Args {
    /// Configuration file (.yaml, .yml or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

struct State {
    db: Mutex<Db>,
    server: ServerInfo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config)?;
    setup_logging(&config.logging)?;
    log::info!("Starting pgajob-daemon...");

    let catalog = config.store.catalog_path();
    ensure_parent(&catalog)?;
    let db = Db::open(&catalog).map_err(|e| {
        log::error!("Failed to open catalog at {:?}: {}", catalog, e);
        e
    })?;
    db.prune_audit_log(config.retention.audit_days)?;
    let jobs = db.list_jobs()?.len();
    log::info!("Catalog {:?} holds {} jobs", catalog, jobs);

    let state = Arc::new(State {
        db: Mutex::new(db),
        server: ServerInfo {
            name: config.server.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            databases: config.store.databases.clone(),
        },
    });

    let socket_path = &config.server.socket();
    ensure_parent(socket_path)?;
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    log::info!("Listening on {:?}", socket_path);

    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(socket_path)?.permissions();
    perms.set_mode(0o666);
    std::fs::set_permissions(socket_path, perms)?;

    loop {
        let (socket, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, state).await {
                log::error!("connection closed with error: {}", e);
            }
        });
    }
}

async fn handle_connection(socket: UnixStream, state: Arc<State>) -> anyhow::Result<()> {
    let user = match socket.peer_cred() {
        Ok(cred) => user_name(cred.uid()),
        Err(e) => {
            log::error!("Failed to get peer credentials: {}", e);
            return Ok(());
        }
    };

    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match decode::<Request>(&line) {
            Ok(request) => {
                log::info!("{} {} from {}", request.name(), request.path(), user);
                match state.db.lock() {
                    Ok(mut db) => handler::handle_request(&mut db, &state.server, request, &user),
                    Err(_) => Response::Error("Catalog is unavailable".to_string()),
                }
            }
            Err(e) => {
                log::warn!("failed to deserialize request; err = {}", e);
                Response::Error(format!("Malformed request: {}", e))
            }
        };

        writer.write_all(&encode(&response)?).await?;
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Login name for a peer uid, or the numeric uid when it has none.
fn user_name(uid: u32) -> String {
    match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if nix::unistd::Uid::effective().is_root() {
        config.logging.output = Some(PathBuf::from(common::DEFAULT_LOG_FILE));
    } else {
        config.server.socket_path = Some(PathBuf::from(common::USER_SOCKET_PATH));
        config.store.path = Some(PathBuf::from(common::USER_DB_PATH));
        config.logging.output = Some(PathBuf::from(common::USER_LOG_FILE));
    }

    let path = path.or_else(|| {
        let default = PathBuf::from(common::DEFAULT_CONFIG_PATH);
        default.exists().then_some(default)
    });
    if let Some(path) = path {
        config.merge(Config::from_file(&path)?);
    }
    Ok(config)
}

fn setup_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let level = logging
        .level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);
    let log_file = std::env::var("PGAJOB_LOG")
        .ok()
        .map(PathBuf::from)
        .or_else(|| logging.output.clone());

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        ensure_parent(&path)?;
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}
