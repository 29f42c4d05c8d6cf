use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::shutdown::{Reason, Shutdown};
use crate::dispatch::{DispatchError, Dispatcher, HandleResult, ShortMessage};

/// Host loop failure. Dispatch errors are reported per line instead.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to read input: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write output: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Totals for one run of the host loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub received: u64,
    pub malformed: u64,
    pub failed: u64,
    pub fatal: u64,
}

impl ServeSummary {
    pub fn is_fatal(&self) -> bool {
        self.fatal > 0
    }
}

/// One output line.
#[derive(Debug, Serialize)]
struct Reply {
    line: u64,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    result: Option<HandleResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    fatal: bool,
}

impl Reply {
    fn handled(line: u64, result: Result<HandleResult, DispatchError>) -> Self {
        match result {
            Ok(result) => Self {
                line,
                result: Some(result),
                error: None,
                fatal: false,
            },
            Err(e) => Self {
                line,
                result: None,
                fatal: e.is_fatal(),
                error: Some(e.to_string()),
            },
        }
    }

    fn malformed(line: u64, error: &serde_json::Error) -> Self {
        Self {
            line,
            result: None,
            error: Some(format!("malformed message: {error}")),
            fatal: false,
        }
    }
}

/// Dispatcher host: newline-delimited JSON [`ShortMessage`]s in, one JSON
/// reply per message out.
///
/// Messages are dispatched concurrently, so replies may be written out of
/// input order; each carries the 1-based line number it answers.
pub struct Server {
    dispatcher: Dispatcher,
    shutdown: Arc<Shutdown>,
}

impl Server {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            shutdown: Shutdown::new(),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run until end of input, a drain request or a fatal dispatch error,
    /// then wait for in-flight messages.
    #[instrument(name = "smsdispatch", skip_all, fields(version = env!("CARGO_PKG_VERSION")))]
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<ServeSummary, ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut state = self.shutdown.subscribe();
        let mut tasks: JoinSet<Reply> = JoinSet::new();
        let mut summary = ServeSummary::default();
        let mut line_no = 0u64;
        let mut reading = self.shutdown.is_accepting();
        let mut read_error = None;

        info!("accepting messages");

        loop {
            if !reading && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = tasks.join_next() => {
                    let reply = match joined {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!(error = %e, "dispatch task failed");
                            continue;
                        }
                    };
                    if reply.fatal {
                        summary.fatal += 1;
                    } else if reply.error.is_some() {
                        summary.failed += 1;
                    }
                    write_reply(&mut output, &reply).await?;
                }

                changed = state.changed(), if reading => {
                    if changed.is_err() || !self.shutdown.is_accepting() {
                        debug!("input closed by shutdown");
                        reading = false;
                    }
                }

                next = lines.next_line(), if reading => match next {
                    Ok(Some(text)) => {
                        line_no += 1;
                        if text.trim().is_empty() {
                            continue;
                        }
                        summary.received += 1;

                        let msg: ShortMessage = match serde_json::from_str(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(line = line_no, error = %e, "malformed message");
                                summary.malformed += 1;
                                write_reply(&mut output, &Reply::malformed(line_no, &e)).await?;
                                continue;
                            }
                        };

                        if !self.shutdown.message_started() {
                            reading = false;
                            continue;
                        }
                        let dispatcher = self.dispatcher.clone();
                        let shutdown = self.shutdown.clone();
                        let line = line_no;
                        tasks.spawn(async move {
                            let result = dispatcher.handle(&msg).await;
                            if matches!(&result, Err(e) if e.is_fatal()) {
                                shutdown.start_drain(Reason::Fatal);
                            }
                            shutdown.message_finished();
                            Reply::handled(line, result)
                        });
                    }
                    Ok(None) => {
                        reading = false;
                        self.shutdown.start_drain(Reason::EndOfInput);
                    }
                    Err(e) => {
                        error!(line = line_no, error = %e, "failed to read input");
                        reading = false;
                        read_error = Some(e);
                        self.shutdown.start_drain(Reason::EndOfInput);
                    }
                },

                else => break,
            }
        }

        self.shutdown.terminate();
        output.flush().await.map_err(ServerError::Write)?;

        info!(
            received = summary.received,
            malformed = summary.malformed,
            failed = summary.failed,
            fatal = summary.fatal,
            reason = ?self.shutdown.reason(),
            "host loop stopped"
        );

        match read_error {
            Some(e) => Err(ServerError::Read(e)),
            None => Ok(summary),
        }
    }
}

async fn write_reply<W>(output: &mut W, reply: &Reply) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    output.write_all(&line).await.map_err(ServerError::Write)?;
    output.flush().await.map_err(ServerError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Configuration, DispatchConfig, EndpointConfig, LogEndpointConfig, MappingConfig,
        PatternConfig, TransportConfig,
    };
    use crate::endpoint::EndpointRegistry;
    use crate::retry::RetryScheduler;
    use std::time::Duration;
    use tempfile::TempDir;

    fn server(dir: &TempDir, fail_rate: f64) -> Server {
        let config = DispatchConfig {
            retry_root: dir.path().to_path_buf(),
            patterns: vec![PatternConfig {
                pattern: "STOP.*".into(),
                flags: vec![],
            }],
            endpoints: vec![EndpointConfig {
                retry_interval: Duration::from_secs(3600),
                transport: TransportConfig::Log(LogEndpointConfig {
                    fail_rate,
                    ..Default::default()
                }),
            }],
            mappings: vec![MappingConfig {
                number: "100".into(),
                endpoint: 0,
            }],
            ..Default::default()
        };
        let cfg = Configuration::build(&config, &EndpointRegistry::new(), &RetryScheduler::spawn())
            .unwrap();
        Server::new(Dispatcher::new(Arc::new(cfg)))
    }

    fn replies(output: &[u8]) -> Vec<serde_json::Value> {
        let mut replies: Vec<serde_json::Value> = output
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_slice(l).unwrap())
            .collect();
        replies.sort_by_key(|r| r["line"].as_u64());
        replies
    }

    #[tokio::test]
    async fn test_one_reply_per_message() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, 0.0);
        let input = concat!(
            r#"{"from":"1","to":"100","body":"STOP ALL"}"#,
            "\n",
            r#"{"from":"1","to":"100","body":"hello"}"#,
            "\n",
            "\n",
            "not json\n",
        );

        let mut output = Vec::new();
        let summary = server.run(input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(summary.received, 3);
        assert_eq!(summary.malformed, 1);
        assert!(!summary.is_fatal());

        let replies = replies(&output);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["line"], 1);
        assert_eq!(replies[0]["result"], "handled");
        assert_eq!(replies[0]["code"], 1);
        assert_eq!(replies[1]["result"], "not_handled");
        assert_eq!(replies[2]["line"], 4);
        assert!(replies[2]["error"].as_str().unwrap().contains("malformed"));

        assert_eq!(server.dispatcher().stats().delivered, 1);
        assert_eq!(server.shutdown_handle().reason(), Some(Reason::EndOfInput));
    }

    #[tokio::test]
    async fn test_fatal_error_stops_input() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, 1.0);

        let retry_dir = server.dispatcher().configuration().endpoints()[0]
            .store()
            .dir()
            .to_path_buf();
        std::fs::remove_dir_all(&retry_dir).unwrap();
        std::fs::write(&retry_dir, "blocked").unwrap();

        let (mut tx, rx) = tokio::io::duplex(1024);
        tx.write_all(b"{\"from\":\"1\",\"to\":\"100\",\"body\":\"STOP\"}\n")
            .await
            .unwrap();

        // The writer half stays open; only the fatal error ends the loop.
        let mut output = Vec::new();
        let summary = server
            .run(tokio::io::BufReader::new(rx), &mut output)
            .await
            .unwrap();
        assert!(summary.is_fatal());
        assert_eq!(server.shutdown_handle().reason(), Some(Reason::Fatal));

        let replies = replies(&output);
        assert_eq!(replies[0]["fatal"], true);
        drop(tx);
    }

    #[tokio::test]
    async fn test_drain_before_run_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, 0.0);
        server.shutdown_handle().start_drain(Reason::Signal);

        let mut output = Vec::new();
        let input = "{\"from\":\"1\",\"to\":\"100\",\"body\":\"STOP\"}\n";
        let summary = server.run(input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(summary.received, 0);
        assert!(output.is_empty());
    }
}
