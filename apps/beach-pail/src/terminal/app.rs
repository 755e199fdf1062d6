use std::io::{self, Write};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::session::{SessionController, SessionSnapshot, SessionState};
use crate::telemetry::logging;
use crate::terminal::cli::{Cli, LoggingArgs};
use crate::terminal::error::CliError;
use crate::transport::{Connector, WebSocketConnector};

pub fn init_logging(args: &LoggingArgs) -> Result<(), CliError> {
    logging::init(&args.to_config())?;
    Ok(())
}

pub async fn run(cli: Cli) -> Result<SessionSnapshot, CliError> {
    let config = ClientConfig::try_from(&cli.connection)?;
    info!(endpoint = %config.endpoint, "using packaging worker");
    let controller = SessionController::new(WebSocketConnector, config);
    if cli.json {
        let snapshot = follow(&controller, &cli.url, &mut io::sink()).await?;
        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &snapshot)?;
        writeln!(stdout)?;
        Ok(snapshot)
    } else {
        follow(&controller, &cli.url, &mut io::stdout()).await
    }
}

/// Runs one session to completion, streaming its progress to `out`. Ctrl-C
/// cancels the session.
pub async fn follow<C: Connector>(
    controller: &SessionController<C>,
    url: &str,
    out: &mut dyn Write,
) -> Result<SessionSnapshot, CliError> {
    let mut updates = controller.subscribe();
    let id = controller.start(url)?;
    let mut renderer = Renderer::default();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut listening = true;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.id == id {
            renderer.render(&snapshot, out)?;
            if !snapshot.busy {
                return Ok(snapshot);
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(controller.snapshot());
                }
            }
            signal = &mut interrupt, if listening => {
                listening = false;
                match signal {
                    Ok(()) => {
                        warn!(session_id = %id, "interrupted; cancelling session");
                        controller.cancel();
                    }
                    Err(err) => warn!(error = %err, "unable to listen for ctrl-c"),
                }
            }
        }
    }
}

/// Prints what changed between successive snapshots of one session.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: usize,
    progress: u8,
    finished: bool,
}

impl Renderer {
    pub fn render(&mut self, snapshot: &SessionSnapshot, out: &mut dyn Write) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        for line in snapshot.logs.iter().skip(self.printed) {
            writeln!(out, "{line}")?;
        }
        self.printed = self.printed.max(snapshot.logs.len());

        if snapshot.progress != self.progress {
            self.progress = snapshot.progress;
            writeln!(out, "  [{:>3}%]", self.progress)?;
        }

        if !snapshot.busy {
            self.finished = true;
            match (snapshot.state, &snapshot.result) {
                (SessionState::Completed, Some(outcome)) => {
                    if let Some(link) = outcome.artifact_link() {
                        match &snapshot.artifact_name {
                            Some(name) => writeln!(out, "archive ready: {link} ({name})")?,
                            None => writeln!(out, "archive ready: {link}")?,
                        }
                    }
                }
                (_, Some(outcome)) => {
                    if let Some(message) = outcome.error_message() {
                        writeln!(out, "worker reported an error: {message}")?;
                    }
                }
                _ => {}
            }
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionId, SessionOutcome, log};

    fn snapshot(logs: &[&str], progress: u8, busy: bool) -> SessionSnapshot {
        SessionSnapshot {
            id: SessionId::new(1),
            url: "https://example.test".into(),
            state: if busy {
                SessionState::InProgress
            } else {
                SessionState::Failed
            },
            busy,
            progress,
            logs: logs.iter().map(|line| line.to_string()).collect(),
            result: None,
            artifact_name: None,
        }
    }

    #[test]
    fn unopenable_log_file_is_a_logging_error() {
        let args = LoggingArgs {
            level: logging::LogLevel::Info,
            file: Some("/nonexistent-beach-pail-dir/pail.log".into()),
        };
        match init_logging(&args) {
            Err(CliError::Logging(logging::InitError::Io { path, .. })) => {
                assert_eq!(path, std::path::PathBuf::from("/nonexistent-beach-pail-dir/pail.log"));
            }
            other => panic!("expected logging error, got {other:?}"),
        }
    }

    fn rendered(out: Vec<u8>) -> String {
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn prints_only_new_lines_and_progress_changes() {
        let mut renderer = Renderer::default();
        let mut out = Vec::new();

        renderer
            .render(&snapshot(&[log::INITIALIZING, log::CONNECTING], 0, true), &mut out)
            .expect("render");
        renderer
            .render(
                &snapshot(&[log::INITIALIZING, log::CONNECTING, "> STEP"], 40, true),
                &mut out,
            )
            .expect("render");
        renderer
            .render(
                &snapshot(&[log::INITIALIZING, log::CONNECTING, "> STEP"], 40, true),
                &mut out,
            )
            .expect("render");

        assert_eq!(
            rendered(out),
            format!(
                "{}\n{}\n> STEP\n  [ 40%]\n",
                log::INITIALIZING,
                log::CONNECTING
            )
        );
    }

    #[test]
    fn completed_session_prints_link() {
        let mut renderer = Renderer::default();
        let mut out = Vec::new();
        let mut done = snapshot(&[log::ARCHIVE_CREATED], 100, false);
        done.state = SessionState::Completed;
        done.result = Some(SessionOutcome::ArtifactLink("/files/x.zip".into()));
        done.artifact_name = Some("x.zip".into());

        renderer.render(&done, &mut out).expect("render");
        renderer.render(&done, &mut out).expect("render");

        assert_eq!(
            rendered(out),
            format!(
                "{}\n  [100%]\narchive ready: /files/x.zip (x.zip)\n",
                log::ARCHIVE_CREATED
            )
        );
    }

    #[test]
    fn failed_session_prints_worker_message() {
        let mut renderer = Renderer::default();
        let mut out = Vec::new();
        let mut failed = snapshot(&["> ERROR: INVALID URL"], 0, false);
        failed.result = Some(SessionOutcome::ErrorMessage("invalid url".into()));

        renderer.render(&failed, &mut out).expect("render");

        assert_eq!(
            rendered(out),
            "> ERROR: INVALID URL\nworker reported an error: invalid url\n"
        );
    }
}
