use std::{
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    runtime::Runtime,
    sync::mpsc::{self, error::TryRecvError},
    time::timeout,
};
use tracing::{debug, info, warn};
use ztui_core::{ReplyAggregator, decode_reply_line, encode_auth_line, encode_request_line};

use crate::{
    auth,
    window::{ConnectError, Connector},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 5_000;

/// Outgoing side of the control connection.
pub trait Transport {
    /// Queues one command line. Never waits for the reply.
    fn send(&self, command: &str);
}

/// TCP client for the service's local control port.
///
/// Owns a small tokio runtime that keeps the connection alive; dropping the
/// client shuts it down. Reply lines are fed to `replies` from the runtime's
/// thread.
pub struct LocalClient {
    runtime: Option<Runtime>,
    outgoing_tx: mpsc::UnboundedSender<String>,
    next_request_id: AtomicU64,
}

impl LocalClient {
    pub fn start(
        service_addr: String,
        auth_token: String,
        replies: Arc<ReplyAggregator>,
    ) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ztui-transport")
            .enable_all()
            .build()?;
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        runtime.spawn(connection_task(service_addr, auth_token, outgoing_rx, replies));

        Ok(Self {
            runtime: Some(runtime),
            outgoing_tx,
            next_request_id: AtomicU64::new(1),
        })
    }
}

impl Transport for LocalClient {
    fn send(&self, command: &str) {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        if self
            .outgoing_tx
            .send(encode_request_line(request_id, command))
            .is_err()
        {
            warn!(request_id, "transport stopped, dropping command");
        }
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

enum SessionEnd {
    ClientDropped,
    Lost(io::Error),
}

async fn connection_task(
    service_addr: String,
    auth_token: String,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    replies: Arc<ReplyAggregator>,
) {
    let mut attempt: u32 = 0;

    loop {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(&service_addr)).await {
            Ok(Ok(stream)) => {
                info!(%service_addr, "connected to service");
                attempt = 0;
                match run_session(stream, &auth_token, &mut outgoing_rx, &replies).await {
                    SessionEnd::ClientDropped => return,
                    SessionEnd::Lost(err) => {
                        warn!(%service_addr, "service connection lost: {err}");
                        // Their terminators can only come over the lost connection.
                        let discarded = replies.discard_pending();
                        if discarded > 0 {
                            debug!(discarded, "dropped partial replies");
                        }
                    }
                }
            }
            Ok(Err(err)) => warn!(attempt, %service_addr, "connect failed: {err}"),
            Err(_) => warn!(attempt, %service_addr, "connect timed out after {CONNECT_TIMEOUT:?}"),
        }

        // Anything queued now was meant for a connection that no longer exists.
        let mut dropped = 0_usize;
        loop {
            match outgoing_rx.try_recv() {
                Ok(_) => dropped += 1,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }
        if dropped > 0 {
            debug!(dropped, "discarded commands while disconnected");
        }

        tokio::time::sleep(backoff_delay(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn run_session(
    stream: TcpStream,
    auth_token: &str,
    outgoing_rx: &mut mpsc::UnboundedReceiver<String>,
    replies: &ReplyAggregator,
) -> SessionEnd {
    let (read_half, mut write_half) = stream.into_split();
    if let Err(err) = write_line(&mut write_half, &encode_auth_line(auth_token)).await {
        return SessionEnd::Lost(err);
    }

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(line) => {
                    if let Err(err) = write_line(&mut write_half, &line).await {
                        return SessionEnd::Lost(err);
                    }
                }
                None => return SessionEnd::ClientDropped,
            },
            incoming = lines.next_line() => match incoming {
                Ok(Some(line)) => match decode_reply_line(&line) {
                    Ok((request_id, text)) => replies.on_line(request_id, text),
                    Err(err) => warn!("ignoring reply line: {err}"),
                },
                Ok(None) => {
                    return SessionEnd::Lost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "service closed the connection",
                    ));
                }
                Err(err) => return SessionEnd::Lost(err),
            },
        }
    }
}

async fn write_line(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    line: &str,
) -> io::Result<()> {
    write_half.write_all(format!("{line}\n").as_bytes()).await
}

fn backoff_delay(attempt: u32) -> Duration {
    let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << attempt.min(8));
    Duration::from_millis(backoff_ms.min(BACKOFF_MAX_MS))
}

/// Builds the [`LocalClient`] on the first poll: obtains the auth token and
/// hands the client the shared aggregator.
pub struct LocalConnector {
    service_addr: String,
    auth_token_path: PathBuf,
    aggregator: Arc<ReplyAggregator>,
}

impl LocalConnector {
    pub fn new(
        service_addr: String,
        auth_token_path: PathBuf,
        aggregator: Arc<ReplyAggregator>,
    ) -> Self {
        Self {
            service_addr,
            auth_token_path,
            aggregator,
        }
    }
}

impl Connector for LocalConnector {
    type Transport = LocalClient;

    fn connect(&mut self) -> Result<LocalClient, ConnectError> {
        let token = auth::obtain_token(&self.auth_token_path)?;
        LocalClient::start(
            self.service_addr.clone(),
            token,
            Arc::clone(&self.aggregator),
        )
        .map_err(ConnectError::Runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(200));
        assert_eq!(backoff_delay(1), Duration::from_millis(400));
        assert_eq!(backoff_delay(4), Duration::from_millis(3_200));
        assert_eq!(backoff_delay(5), Duration::from_millis(BACKOFF_MAX_MS));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(BACKOFF_MAX_MS));
    }
}
