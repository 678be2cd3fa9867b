//! Serve the line protocol over a pair of byte streams.
//!
//! The reader loop never blocks on a command: each command runs in its own
//! task so callback responses for an in-flight turn keep flowing in.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::protocol::{Command, CommandResponse, Inbound};
use super::{spawn_writer, Frame, FrameReader, OutputSink};
use crate::channel::CallbackChannel;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::engine::EngineFactory;
use crate::error::ProtocolError;
use crate::wallet::{HostWallet, WalletProvider};

/// Serve the worker over the process's stdin and stdout.
pub async fn serve_stdio(config: Config, factory: Arc<dyn EngineFactory>) -> Result<()> {
    info!("Serving bridge protocol on stdio");
    serve(tokio::io::stdin(), tokio::io::stdout(), config, factory).await
}

/// Serve the worker until `reader` reaches end of stream.
///
/// On end of stream pending callbacks are failed, in-flight commands are
/// allowed to finish, the session is torn down and all output is flushed.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    config: Config,
    factory: Arc<dyn EngineFactory>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sink, rx) = OutputSink::channel();
    let writer_task = spawn_writer(writer, rx);

    let channel = CallbackChannel::new(sink.clone(), config.callbacks.clone());
    let wallet: Arc<dyn WalletProvider> = Arc::new(HostWallet::new(Arc::clone(&channel)));
    let dispatcher = Arc::new(Dispatcher::new(factory, wallet));

    let max_line_bytes = config.protocol.max_line_bytes;
    let mut frames = FrameReader::new(BufReader::new(reader), max_line_bytes);
    let mut tasks = JoinSet::new();

    loop {
        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read input, shutting down");
                break;
            }
        };

        while let Some(result) = tasks.try_join_next() {
            report_task(result);
        }

        match frame {
            Frame::Oversized(len) => {
                let error = ProtocolError::LineTooLong {
                    len,
                    max: max_line_bytes,
                };
                warn!(error = %error, "Rejecting oversized line");
                respond(&sink, &CommandResponse::error(None, error.to_string()));
            }
            Frame::Line(line) if line.trim().is_empty() => {}
            Frame::Line(line) => match Inbound::parse(&line) {
                Ok(Inbound::CallbackResponse(response)) => {
                    channel.resolve(response);
                }
                Ok(Inbound::Ignored(reason)) => {
                    warn!(reason = %reason, "Ignoring inbound line");
                }
                Ok(Inbound::Command(request)) => {
                    let id = request.id;
                    match Command::from_request(request) {
                        Ok(command) => {
                            let dispatcher = Arc::clone(&dispatcher);
                            let sink = sink.clone();
                            tasks.spawn(async move {
                                let response = dispatcher.dispatch(id, command).await;
                                respond(&sink, &response);
                            });
                        }
                        Err(e) => {
                            warn!(id = ?id, error = %e, "Rejecting command");
                            respond(&sink, &CommandResponse::error(id, e.to_string()));
                        }
                    }
                }
                Err((id, e)) => {
                    warn!(id = ?id, error = %e, "Rejecting inbound line");
                    respond(&sink, &CommandResponse::error(id, e.to_string()));
                }
            },
        }
    }

    info!(in_flight = tasks.len(), "Input closed, shutting down");
    channel.close();
    while let Some(result) = tasks.join_next().await {
        report_task(result);
    }
    dispatcher.shutdown().await;

    // The writer drains and exits once every sink handle is gone.
    drop(dispatcher);
    drop(channel);
    drop(sink);
    writer_task
        .await
        .context("Output writer task failed")?
        .context("Failed to write output")?;

    debug!("Worker stopped");
    Ok(())
}

fn respond(sink: &OutputSink, response: &CommandResponse) {
    if let Err(e) = sink.send_json(response) {
        error!(id = ?response.id, error = %e, "Failed to serialize response");
    }
}

fn report_task(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Dispatch task did not complete");
    }
}
