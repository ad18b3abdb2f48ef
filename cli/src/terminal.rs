//! Terminal stand-ins for the browser's notification area, clipboard and
//! query tool.

use std::path::PathBuf;
use std::process::Command;

use common::{Clipboard, ItemData, Notifier, QueryTool};

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("{}", message);
    }
}

/// Where copied text ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardTarget {
    Stdout,
    File(PathBuf),
}

impl Clipboard for ClipboardTarget {
    fn copy(&self, text: &str) -> common::Result<()> {
        match self {
            ClipboardTarget::Stdout => {
                println!("{}", text);
                Ok(())
            }
            ClipboardTarget::File(path) => {
                std::fs::write(path, format!("{}\n", text))?;
                log::debug!("copied {} bytes to {}", text.len(), path.display());
                Ok(())
            }
        }
    }
}

/// Launches `command <server>` when configured; otherwise tells the user
/// which server to open the query tool on.
pub struct QueryToolLauncher {
    command: Option<String>,
}

impl QueryToolLauncher {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }
}

impl QueryTool for QueryToolLauncher {
    fn open(&self, server: &ItemData) -> common::Result<()> {
        let Some(command) = &self.command else {
            println!("Open the query tool on server '{}' to run it.", server.label);
            return Ok(());
        };

        log::info!("launching query tool '{}' for {}", command, server.label);
        let status = Command::new(command).arg(&server.label).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("query tool '{}' exited with {}", command, status),
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::NodeKind;

    #[test]
    fn test_file_clipboard() {
        let path = std::env::temp_dir().join(format!("pgajob-clip-{}.sql", std::process::id()));
        ClipboardTarget::File(path.clone()).copy("SELECT 1;").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "SELECT 1;\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unwritable_clipboard_fails() {
        let target = ClipboardTarget::File(PathBuf::from("/nonexistent/dir/query.sql"));
        assert!(target.copy("SELECT 1;").is_err());
    }

    #[test]
    fn test_blank_query_tool_command_ignored() {
        let launcher = QueryToolLauncher::new(Some("  ".to_string()));
        let server = ItemData::new(NodeKind::Server, None, "local");
        assert!(launcher.open(&server).is_ok());
    }

    #[test]
    fn test_failing_query_tool() {
        let launcher = QueryToolLauncher::new(Some("false".to_string()));
        let server = ItemData::new(NodeKind::Server, None, "local");
        assert!(launcher.open(&server).is_err());
    }
}
