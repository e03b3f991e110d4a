use std::{collections::VecDeque, fmt, io, sync::mpsc::Receiver};

use tracing::{debug, info, warn};
use ztui_core::{
    Command, CoreError, NetworkId, NetworkList, NodeStatus, Reply, ReplyBatch, parse_reply,
    sanitize_network_id,
};

use crate::{auth::AuthError, transport::Transport};

pub const INVALID_NETWORK_ID_TITLE: &str = "Invalid Network ID";
pub const INVALID_NETWORK_ID_MESSAGE: &str = "The network ID you entered was not valid. Enter a 16-digit hexadecimal network ID, like '8056c2e21c000001'.";
pub const UNRESPONSIVE_TITLE: &str = "No Response from Service";
pub const UNRESPONSIVE_MESSAGE: &str = "The ZeroTier One service does not appear to be running.";

/// Short message shown in its own window until dismissed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: &'static str,
    pub message: String,
}

impl Notice {
    pub fn unresponsive() -> Self {
        Self {
            title: UNRESPONSIVE_TITLE,
            message: UNRESPONSIVE_MESSAGE.to_owned(),
        }
    }

    pub fn invalid_network_id() -> Self {
        Self {
            title: INVALID_NETWORK_ID_TITLE,
            message: INVALID_NETWORK_ID_MESSAGE.to_owned(),
        }
    }
}

/// Notices waiting to be shown, oldest first.
///
/// A notice whose title is already queued is not queued again, so repeated
/// rejections stack up as one window.
#[derive(Debug, Default)]
pub struct NoticeQueue {
    pending: VecDeque<Notice>,
}

impl NoticeQueue {
    pub fn push(&mut self, notice: Notice) -> bool {
        if self.pending.iter().any(|queued| queued.title == notice.title) {
            return false;
        }
        self.pending.push_back(notice);
        true
    }

    pub fn current(&self) -> Option<&Notice> {
        self.pending.front()
    }

    pub fn dismiss(&mut self) -> Option<Notice> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Creates the transport on the first poll tick.
pub trait Connector {
    type Transport: Transport;

    fn connect(&mut self) -> Result<Self::Transport, ConnectError>;
}

/// Failure to bring up the transport. Always fatal for the application.
#[derive(Debug)]
pub enum ConnectError {
    Auth(AuthError),
    Runtime(io::Error),
}

impl ConnectError {
    pub fn title(&self) -> &'static str {
        match self {
            ConnectError::Auth(err) => err.title(),
            ConnectError::Runtime(_) => "Unable to Start",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ConnectError::Auth(err) => err.user_message(),
            ConnectError::Runtime(err) => format!("Failed to start the service connection:\n\n{err}"),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Auth(err) => write!(f, "authentication failed: {err}"),
            ConnectError::Runtime(err) => write!(f, "transport runtime init failed: {err}"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Auth(err) => Some(err),
            ConnectError::Runtime(err) => Some(err),
        }
    }
}

impl From<AuthError> for ConnectError {
    fn from(err: AuthError) -> Self {
        ConnectError::Auth(err)
    }
}

#[derive(Debug)]
pub enum JoinError {
    InvalidNetworkId(CoreError),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::InvalidNetworkId(err) => write!(f, "invalid network id: {err}"),
        }
    }
}

impl std::error::Error for JoinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JoinError::InvalidNetworkId(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Polled,
    /// The poll that just went out is the third in a row without an answer.
    ServiceUnresponsive,
}

/// Toolkit-independent state behind the main window.
///
/// Ticks and reply processing both run on the UI thread; replies arrive
/// through `replies`, fed by the aggregator on the transport's threads.
pub struct MainWindow<C: Connector> {
    connector: C,
    transport: Option<C::Transport>,
    replies: Receiver<ReplyBatch>,
    node: NodeStatus,
    networks: NetworkList,
    network_id_input: String,
}

impl<C: Connector> MainWindow<C> {
    pub fn new(connector: C, replies: Receiver<ReplyBatch>) -> Self {
        Self {
            connector,
            transport: None,
            replies,
            node: NodeStatus::default(),
            networks: NetworkList::new(),
            network_id_input: String::new(),
        }
    }

    /// One poll cycle. Connects on first use, then sends the three status
    /// queries.
    pub fn tick(&mut self) -> Result<TickOutcome, ConnectError> {
        if self.transport.is_none() {
            let transport = self.connector.connect()?;
            info!("service transport ready");
            self.transport = Some(transport);
        }

        let outcome = if self.node.record_poll() {
            warn!(
                cycles = self.node.cycles_since_response,
                "service is not answering"
            );
            TickOutcome::ServiceUnresponsive
        } else {
            TickOutcome::Polled
        };

        if let Some(transport) = &self.transport {
            for command in Command::POLL {
                transport.send(&command.to_string());
            }
        }
        Ok(outcome)
    }

    /// Applies every batch delivered since the last call.
    pub fn process_replies(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(batch) = self.replies.try_recv() {
            self.handle_batch(&batch);
            processed += 1;
        }
        processed
    }

    pub fn handle_batch(&mut self, batch: &[String]) {
        let Some(reply) = parse_reply(batch) else {
            debug!(
                first_line = batch.first().map(String::as_str).unwrap_or_default(),
                "discarding reply"
            );
            return;
        };

        self.node.apply(&reply);
        if let Reply::ListNetworks(snapshot) = &reply {
            let summary = self.networks.reconcile(snapshot);
            if summary.added > 0 || summary.removed > 0 {
                debug!(
                    added = summary.added,
                    updated = summary.updated,
                    removed = summary.removed,
                    "network list changed"
                );
            }
        }
    }

    /// Replaces the network id field, keeping only what a network id can hold.
    pub fn set_network_id_input(&mut self, text: &str) {
        self.network_id_input = sanitize_network_id(text);
    }

    pub fn network_id_input(&self) -> &str {
        &self.network_id_input
    }

    /// Sends `join` for the id in the input field. The field is cleared
    /// either way.
    pub fn join_network(&mut self) -> Result<(), JoinError> {
        let to_join = std::mem::take(&mut self.network_id_input);

        let Some(transport) = &self.transport else {
            debug!("join requested before the service connection exists");
            return Ok(());
        };

        let network_id = to_join
            .parse::<NetworkId>()
            .map_err(JoinError::InvalidNetworkId)?;
        info!(%network_id, "joining network");
        transport.send(&Command::Join(network_id).to_string());
        Ok(())
    }

    pub fn node(&self) -> &NodeStatus {
        &self.node
    }

    pub fn networks(&self) -> &NetworkList {
        &self.networks
    }

    pub fn address(&self) -> &str {
        &self.node.address
    }

    pub fn status_line(&self) -> Option<String> {
        self.node.status_line()
    }

    /// Controls are only usable while the node reports itself online.
    pub fn is_enabled(&self) -> bool {
        self.node.is_online()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }
}
