//! Line-oriented terminal shell

use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Shell;
use crate::app::AppCommand;
use crate::config::LocalToolSettings;
use crate::view::{CredentialNotice, Screen, StatusView};

pub const CONSOLE_USAGE: &str = "\
Commands:
    <api key>                          Submit an API key
    :retry                             Check the API key again
    :obs                               Show the OBS settings
    :obs <address> <port> [password]   Save OBS settings and connect
    :connect                           Connect to OBS with the current settings
    :cancel                            Abandon a connection attempt
    :hide                              Hide the OBS settings
    :logs                              Print the log
    :quit                              Exit";

/// Turn one line of console input into commands. `current` holds the OBS
/// settings in use and is updated by `:obs <address> <port>`.
pub fn parse_line(line: &str, current: &mut LocalToolSettings) -> Result<Vec<AppCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    if !line.starts_with(':') {
        return Ok(vec![AppCommand::SubmitCredential(line.to_string())]);
    }

    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let commands = match (command, args.as_slice()) {
        (":quit" | ":q", []) => vec![AppCommand::Shutdown],
        (":logs", []) => vec![AppCommand::OpenLogs],
        (":retry", []) => vec![AppCommand::RetryValidation],
        (":connect", []) => vec![AppCommand::ConnectTool(current.clone())],
        (":cancel", []) => vec![AppCommand::CancelToolConnect],
        (":hide", []) => vec![AppCommand::HideToolForm],
        (":obs", []) => vec![AppCommand::ShowToolForm],
        (":obs", [address, port, rest @ ..]) if rest.len() <= 1 => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("Invalid port: {}", port))?;
            let settings = LocalToolSettings {
                address: address.to_string(),
                port,
                password: rest.first().map(|p| p.to_string()).unwrap_or_default(),
                ..current.clone()
            };
            *current = settings.clone();
            vec![
                AppCommand::SaveToolSettings(settings.clone()),
                AppCommand::ConnectTool(settings),
            ]
        }
        _ => return Err(CONSOLE_USAGE.to_string()),
    };
    Ok(commands)
}

/// Forward console lines to the coordinator. Returns at end of input or
/// once the coordinator is gone. End of input is not a shutdown request, so
/// running detached from a terminal keeps the app alive.
pub fn read_commands(
    input: impl BufRead,
    cmd_tx: mpsc::Sender<AppCommand>,
    mut current: LocalToolSettings,
) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read from stdin: {}", e);
                return;
            }
        };

        match parse_line(&line, &mut current) {
            Ok(commands) => {
                for cmd in commands {
                    if cmd_tx.blocking_send(cmd).is_err() {
                        return;
                    }
                }
            }
            Err(usage) => println!("{}", usage),
        }
    }
    debug!("Console input closed");
}

/// Writes screens as plain text. Status lines are only reprinted when they
/// change, and only log lines not yet shown are printed.
pub struct ConsoleShell<W: Write + Send> {
    out: W,
    labels: Option<(String, String)>,
    /// Sequence number of the next log line to print
    next_log: u64,
}

impl ConsoleShell<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleShell<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            labels: None,
            next_log: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, screen: &Screen) -> io::Result<()> {
        match screen {
            Screen::CredentialEntry { notice } => {
                self.labels = None;
                let prompt = match notice {
                    None => "Enter your API key:",
                    Some(CredentialNotice::Validating) => "Checking API key...",
                    Some(CredentialNotice::Rejected) => {
                        "API key was rejected. Enter a different key:"
                    }
                    Some(CredentialNotice::NetworkError) => {
                        "Could not reach the verification service. Type :retry or enter a key:"
                    }
                };
                writeln!(self.out, "{}", prompt)?;
            }
            Screen::MainStatus(status) => self.render_status(status)?,
            Screen::MainStatusWithToolForm {
                status,
                settings,
                error,
            } => {
                self.render_status(status)?;
                if let Some(error) = error {
                    writeln!(self.out, "OBS connection failed: {}", error)?;
                }
                writeln!(
                    self.out,
                    "OBS settings: {} port {} password {}",
                    settings.address,
                    settings.port,
                    if settings.password.is_empty() { "(none)" } else { "(set)" }
                )?;
                writeln!(
                    self.out,
                    "Type :obs <address> <port> [password] to change them, :connect to retry"
                )?;
            }
        }
        self.out.flush()
    }

    fn render_status(&mut self, status: &StatusView) -> io::Result<()> {
        let labels = (status.cloud_label.clone(), status.tool_label.clone());
        if self.labels.as_ref() != Some(&labels) {
            writeln!(self.out, "Relay: {}", labels.0)?;
            writeln!(self.out, "OBS:   {}", labels.1)?;
            self.labels = Some(labels);
        }

        let skip = self.next_log.saturating_sub(status.first_log) as usize;
        for line in status.logs.iter().skip(skip) {
            writeln!(self.out, "{}", line)?;
        }
        self.next_log = self
            .next_log
            .max(status.first_log + status.logs.len() as u64);
        Ok(())
    }
}

impl<W: Write + Send> Shell for ConsoleShell<W> {
    fn present(&mut self, screen: &Screen) {
        if let Err(e) = self.render(screen) {
            warn!("Failed to write to console: {}", e);
        }
    }

    fn mirror_logs(&mut self, lines: Vec<String>) {
        let result = (|| -> io::Result<()> {
            writeln!(self.out, "--- Logs ---")?;
            for line in &lines {
                writeln!(self.out, "{}", line)?;
            }
            writeln!(self.out, "------------")?;
            self.out.flush()
        })();
        if let Err(e) = result {
            warn!("Failed to write logs to console: {}", e);
        }
    }
}
