use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use thiserror::Error;
use tracing::trace;

pub const NETWORK_ID_LEN: usize = 16;
pub const RESPONSE_OK: &str = "200";
pub const STATUS_ONLINE: &str = "ONLINE";
pub const STATUS_LINE_MIN_WIDTH: usize = 45;
pub const UNRESPONSIVE_AFTER_CYCLES: u32 = 3;
pub const LISTNETWORKS_FIELD_COUNT: usize = 9;
pub const LISTPEERS_MIN_FIELDS: usize = 5;
const NO_ADDRESS: &str = "-";

pub type RequestId = u64;
pub type ReplyBatch = Vec<String>;
/// Networks from one `listnetworks` reply, keyed (and ordered) by identifier.
pub type NetworkSnapshot = BTreeMap<String, NetworkRecord>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("network id must be 16 hex digits, got {0} characters")]
    InvalidNetworkIdLength(usize),
    #[error("network id contains non-hex characters")]
    InvalidNetworkIdDigits,
    #[error("reply line has no numeric request id: {0:?}")]
    InvalidRequestId(String),
}

/// A validated 64-bit virtual network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkId(u64);

impl NetworkId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl FromStr for NetworkId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != NETWORK_ID_LEN {
            return Err(CoreError::InvalidNetworkIdLength(s.chars().count()));
        }
        let mut raw = [0_u8; NETWORK_ID_LEN / 2];
        hex::decode_to_slice(s, &mut raw).map_err(|_| CoreError::InvalidNetworkIdDigits)?;
        Ok(Self(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

/// Requests understood by the node's control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Info,
    ListNetworks,
    ListPeers,
    Join(NetworkId),
}

impl Command {
    /// Sent on every poll tick, in this order.
    pub const POLL: [Command; 3] = [Command::Info, Command::ListNetworks, Command::ListPeers];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Info => f.write_str("info"),
            Command::ListNetworks => f.write_str("listnetworks"),
            Command::ListPeers => f.write_str("listpeers"),
            Command::Join(network_id) => write!(f, "join {network_id}"),
        }
    }
}

pub fn encode_auth_line(token: &str) -> String {
    format!("auth {token}")
}

pub fn encode_request_line(request_id: RequestId, command: &str) -> String {
    format!("{request_id} {command}")
}

/// Splits `<request-id> <text>` into its parts. A bare id means an empty
/// line, i.e. the end of that reply.
pub fn decode_reply_line(line: &str) -> Result<(RequestId, &str), CoreError> {
    let line = line.trim_end_matches('\r');
    let (id, text) = line.split_once(' ').unwrap_or((line, ""));
    let request_id = id
        .parse::<RequestId>()
        .map_err(|_| CoreError::InvalidRequestId(id.to_owned()))?;
    Ok((request_id, text))
}

pub fn split_line(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Collects reply lines per request id and emits each reply once its
/// terminating empty line arrives.
///
/// `on_line` may be called from any thread. The lock is released before the
/// completed batch is handed to `deliver`.
pub struct ReplyAggregator {
    pending: Mutex<HashMap<RequestId, ReplyBatch>>,
    deliver: Box<dyn Fn(ReplyBatch) + Send + Sync>,
}

impl ReplyAggregator {
    pub fn new(deliver: impl Fn(ReplyBatch) + Send + Sync + 'static) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            deliver: Box::new(deliver),
        }
    }

    pub fn on_line(&self, request_id: RequestId, line: &str) {
        let completed = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if !line.is_empty() {
                pending.entry(request_id).or_default().push(line.to_owned());
                return;
            }
            pending.remove(&request_id)
        };

        match completed {
            Some(batch) => (self.deliver)(batch),
            None => trace!(request_id, "end of reply with no pending lines"),
        }
    }

    /// Drops every partially received reply. Used when the connection that
    /// would have terminated them is gone.
    pub fn discard_pending(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let discarded = pending.len();
        pending.clear();
        discarded
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for ReplyAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyAggregator")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// One qualifying `listnetworks` data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub network_id: String,
    pub name: String,
    pub status: String,
    pub config_age: String,
    pub network_type: String,
    pub device: String,
    pub ips: String,
}

impl NetworkRecord {
    // 200 listnetworks <nwid> <name> <status> <config age> <type> <dev> <ips>
    fn from_fields(fields: &[&str]) -> Option<Self> {
        if fields.len() != LISTNETWORKS_FIELD_COUNT || fields[2].len() != NETWORK_ID_LEN {
            return None;
        }
        Some(Self {
            network_id: fields[2].to_ascii_lowercase(),
            name: fields[3].to_owned(),
            status: fields[4].to_owned(),
            config_age: fields[5].to_owned(),
            network_type: fields[6].to_owned(),
            device: fields[7].to_owned(),
            ips: fields[8].to_owned(),
        })
    }
}

/// A parsed `200` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Info {
        address: Option<String>,
        status: Option<String>,
        version: Option<String>,
    },
    ListNetworks(NetworkSnapshot),
    ListPeers {
        direct_online: usize,
    },
    Other(String),
}

/// Interprets a completed batch. Returns `None` for anything that is not a
/// well-formed `200` reply; those are dropped without notice.
pub fn parse_reply(batch: &[String]) -> Option<Reply> {
    let first = batch.first()?;
    let header = split_line(first);
    if header.len() < 2 || header[0] != RESPONSE_OK {
        return None;
    }

    let reply = match header[1] {
        "info" => Reply::Info {
            address: header.get(2).map(|s| (*s).to_owned()),
            status: header.get(3).map(|s| (*s).to_owned()),
            version: header.get(4).map(|s| (*s).to_owned()),
        },
        "listnetworks" => {
            let mut snapshot = NetworkSnapshot::new();
            for line in &batch[1..] {
                if let Some(record) = NetworkRecord::from_fields(&split_line(line)) {
                    snapshot.insert(record.network_id.clone(), record);
                }
            }
            Reply::ListNetworks(snapshot)
        }
        "listpeers" => {
            let direct_online = batch[1..]
                .iter()
                .map(|line| split_line(line))
                .filter(|fields| {
                    // a direct peer has a live IPv4 and/or IPv6 path
                    fields.len() >= LISTPEERS_MIN_FIELDS
                        && (fields[3] != NO_ADDRESS || fields[4] != NO_ADDRESS)
                })
                .count();
            Reply::ListPeers { direct_online }
        }
        other => Reply::Other(other.to_owned()),
    };
    Some(reply)
}

/// What the window knows about the local node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub address: String,
    pub status: String,
    pub version: String,
    pub direct_peers: usize,
    pub cycles_since_response: u32,
}

impl NodeStatus {
    /// Folds a reply into the status fields. Network snapshots are left to
    /// [`NetworkList::reconcile`].
    pub fn apply(&mut self, reply: &Reply) {
        self.cycles_since_response = 0;
        match reply {
            Reply::Info {
                address,
                status,
                version,
            } => {
                if let Some(address) = address {
                    self.address.clone_from(address);
                }
                if let Some(status) = status {
                    self.status.clone_from(status);
                }
                if let Some(version) = version {
                    self.version.clone_from(version);
                }
            }
            Reply::ListPeers { direct_online } => self.direct_peers = *direct_online,
            Reply::ListNetworks(_) | Reply::Other(_) => {}
        }
    }

    /// Counts a poll that has not been answered yet. Returns `true` exactly
    /// when the count reaches [`UNRESPONSIVE_AFTER_CYCLES`].
    pub fn record_poll(&mut self) -> bool {
        self.cycles_since_response = self.cycles_since_response.saturating_add(1);
        self.cycles_since_response == UNRESPONSIVE_AFTER_CYCLES
    }

    pub fn is_online(&self) -> bool {
        self.status == STATUS_ONLINE
    }

    /// `None` until the node has reported its address.
    pub fn status_line(&self) -> Option<String> {
        if self.address.is_empty() {
            return None;
        }
        let line = format!(
            "{}    ({}, v{}, {} peers)",
            self.address, self.status, self.version, self.direct_peers
        );
        Some(format!("{line:<STATUS_LINE_MIN_WIDTH$}"))
    }
}

/// Identity of a displayed entry; survives updates, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEntry {
    handle: EntryHandle,
    network_id: String,
    pub name: String,
    pub status: String,
    pub config_age: String,
    pub network_type: String,
    pub device: String,
    pub ips: String,
}

impl NetworkEntry {
    fn new(handle: EntryHandle, record: &NetworkRecord) -> Self {
        let mut entry = Self {
            handle,
            network_id: record.network_id.clone(),
            name: String::new(),
            status: String::new(),
            config_age: String::new(),
            network_type: String::new(),
            device: String::new(),
            ips: String::new(),
        };
        entry.update_from(record);
        entry
    }

    fn update_from(&mut self, record: &NetworkRecord) {
        self.name.clone_from(&record.name);
        self.status.clone_from(&record.status);
        self.config_age.clone_from(&record.config_age);
        self.network_type.clone_from(&record.network_type);
        self.device.clone_from(&record.device);
        self.ips.clone_from(&record.ips);
    }

    pub fn handle(&self) -> EntryHandle {
        self.handle
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    /// Assigned addresses; the wire field is comma separated, `-` when none.
    pub fn ip_list(&self) -> Vec<&str> {
        self.ips
            .split(',')
            .filter(|ip| !ip.is_empty() && *ip != NO_ADDRESS)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Displayed networks in on-screen order, indexed by identifier.
#[derive(Debug, Default)]
pub struct NetworkList {
    entries: Vec<NetworkEntry>,
    index: HashMap<String, usize>,
    next_handle: u64,
}

impl NetworkList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings the list in line with `snapshot`: entries that disappeared are
    /// removed, surviving entries are updated in place, new ones are appended
    /// in identifier order.
    pub fn reconcile(&mut self, snapshot: &NetworkSnapshot) -> ReconcileSummary {
        let before = self.entries.len();
        self.entries
            .retain(|entry| snapshot.contains_key(&entry.network_id));
        let removed = before - self.entries.len();

        for entry in &mut self.entries {
            if let Some(record) = snapshot.get(&entry.network_id) {
                entry.update_from(record);
            }
        }
        let updated = self.entries.len();
        self.rebuild_index();

        let mut added = 0;
        for (network_id, record) in snapshot {
            if self.index.contains_key(network_id) {
                continue;
            }
            let handle = EntryHandle(self.next_handle);
            self.next_handle += 1;
            self.index.insert(network_id.clone(), self.entries.len());
            self.entries.push(NetworkEntry::new(handle, record));
            added += 1;
        }

        ReconcileSummary {
            added,
            updated,
            removed,
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (position, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.network_id.clone(), position);
        }
    }

    pub fn get(&self, network_id: &str) -> Option<&NetworkEntry> {
        self.index
            .get(network_id)
            .and_then(|position| self.entries.get(*position))
    }

    pub fn contains(&self, network_id: &str) -> bool {
        self.index.contains_key(network_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reduces free text to at most 16 lowercase hex digits.
pub fn sanitize_network_id(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .take(NETWORK_ID_LEN)
        .collect()
}
