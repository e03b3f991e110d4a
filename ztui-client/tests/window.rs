use std::{cell::RefCell, path::PathBuf, rc::Rc, sync::mpsc};

use ztui_client::{
    auth::AuthError,
    transport::Transport,
    window::{
        ConnectError, Connector, JoinError, MainWindow, Notice, NoticeQueue, TickOutcome,
        UNRESPONSIVE_TITLE,
    },
};
use ztui_core::ReplyBatch;

type SentLog = Rc<RefCell<Vec<String>>>;

struct FakeTransport {
    sent: SentLog,
}

impl Transport for FakeTransport {
    fn send(&self, command: &str) {
        self.sent.borrow_mut().push(command.to_owned());
    }
}

struct FakeConnector {
    sent: SentLog,
    connects: Rc<RefCell<u32>>,
    fail: bool,
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    fn connect(&mut self) -> Result<FakeTransport, ConnectError> {
        *self.connects.borrow_mut() += 1;
        if self.fail {
            return Err(ConnectError::Auth(AuthError::TokenUnavailable {
                path: PathBuf::from("/nonexistent/.zeroTierOneAuthToken"),
            }));
        }
        Ok(FakeTransport {
            sent: Rc::clone(&self.sent),
        })
    }
}

struct Harness {
    window: MainWindow<FakeConnector>,
    sent: SentLog,
    connects: Rc<RefCell<u32>>,
    replies: mpsc::Sender<ReplyBatch>,
}

fn harness(fail: bool) -> Harness {
    let sent: SentLog = Rc::default();
    let connects = Rc::new(RefCell::new(0));
    let (replies, reply_rx) = mpsc::channel();
    let connector = FakeConnector {
        sent: Rc::clone(&sent),
        connects: Rc::clone(&connects),
        fail,
    };
    Harness {
        window: MainWindow::new(connector, reply_rx),
        sent,
        connects,
        replies,
    }
}

fn batch(lines: &[&str]) -> ReplyBatch {
    lines.iter().map(|line| (*line).to_owned()).collect()
}

#[test]
fn first_tick_connects_once_and_polls_every_tick() {
    let mut h = harness(false);
    assert!(!h.window.is_connected());

    assert_eq!(h.window.tick().unwrap(), TickOutcome::Polled);
    assert!(h.window.is_connected());
    assert_eq!(*h.sent.borrow(), vec!["info", "listnetworks", "listpeers"]);

    h.window.tick().unwrap();
    assert_eq!(*h.connects.borrow(), 1);
    assert_eq!(h.sent.borrow().len(), 6);
}

#[test]
fn failed_connect_is_reported_and_sends_nothing() {
    let mut h = harness(true);
    let err = h.window.tick().unwrap_err();
    assert_eq!(err.title(), "Cannot Authorize");
    assert!(h.sent.borrow().is_empty());
    assert!(!h.window.is_connected());
}

#[test]
fn unresponsive_warning_fires_once() {
    let mut h = harness(false);
    let outcomes: Vec<TickOutcome> = (0..6).map(|_| h.window.tick().unwrap()).collect();
    let warnings = outcomes
        .iter()
        .filter(|outcome| **outcome == TickOutcome::ServiceUnresponsive)
        .count();
    assert_eq!(warnings, 1);
    assert_eq!(outcomes[2], TickOutcome::ServiceUnresponsive);
}

#[test]
fn valid_reply_resets_missed_counter() {
    let mut h = harness(false);
    h.window.tick().unwrap();
    h.window.tick().unwrap();
    h.window.handle_batch(&batch(&["200 info 89e92ceee5 ONLINE 0.2.5"]));
    assert_eq!(h.window.node().cycles_since_response, 0);

    assert_eq!(h.window.tick().unwrap(), TickOutcome::Polled);
    assert_eq!(h.window.tick().unwrap(), TickOutcome::Polled);
    assert_eq!(h.window.tick().unwrap(), TickOutcome::ServiceUnresponsive);
}

#[test]
fn error_reply_does_not_count_as_response() {
    let mut h = harness(false);
    h.window.tick().unwrap();
    h.window.tick().unwrap();
    h.window.handle_batch(&batch(&["401 info unauthorized"]));
    assert_eq!(h.window.node().cycles_since_response, 2);
    assert_eq!(h.window.tick().unwrap(), TickOutcome::ServiceUnresponsive);
}

#[test]
fn replies_from_channel_update_status_and_networks() {
    let mut h = harness(false);
    h.window.tick().unwrap();

    h.replies
        .send(batch(&["200 info 89e92ceee5 ONLINE 0.2.5"]))
        .unwrap();
    h.replies
        .send(batch(&[
            "200 listnetworks <nwid> <name> <status> <config age> <type> <dev> <ips>",
            "200 listnetworks 8056c2e21c000001 earth OK 4 PUBLIC zt0 28.1.2.3/7",
        ]))
        .unwrap();
    h.replies
        .send(batch(&[
            "200 listpeers <ztaddr> <ipv4> <ipv6> <latency> <version>",
            "200 listpeers 1111111111 1.2.3.4/9993 - 30 0.2.5",
        ]))
        .unwrap();

    assert_eq!(h.window.process_replies(), 3);
    assert!(h.window.is_enabled());
    assert_eq!(h.window.address(), "89e92ceee5");
    assert_eq!(
        h.window.status_line().unwrap().trim_end(),
        "89e92ceee5    (ONLINE, v0.2.5, 1 peers)"
    );
    let earth = h.window.networks().get("8056c2e21c000001").unwrap();
    assert_eq!(earth.name, "earth");
    assert_eq!(earth.ip_list(), vec!["28.1.2.3/7"]);

    h.window.handle_batch(&batch(&["200 info 89e92ceee5 OFFLINE"]));
    assert!(!h.window.is_enabled());
}

#[test]
fn network_id_input_is_sanitized() {
    let mut h = harness(false);
    h.window.set_network_id_input("12AB-34xy");
    assert_eq!(h.window.network_id_input(), "12ab34");

    h.window.set_network_id_input("0123456789ABCDEF0123");
    assert_eq!(h.window.network_id_input(), "0123456789abcdef");
}

#[test]
fn short_network_id_is_rejected_without_sending() {
    let mut h = harness(false);
    h.window.tick().unwrap();
    h.sent.borrow_mut().clear();

    h.window.set_network_id_input("8056c2e21c");
    let err = h.window.join_network().unwrap_err();
    assert!(matches!(err, JoinError::InvalidNetworkId(_)));
    assert_eq!(h.window.network_id_input(), "");
    assert!(h.sent.borrow().is_empty());
}

#[test]
fn valid_network_id_sends_join_and_clears_input() {
    let mut h = harness(false);
    h.window.tick().unwrap();
    h.sent.borrow_mut().clear();

    h.window.set_network_id_input("8056C2E21C000001");
    h.window.join_network().unwrap();
    assert_eq!(h.window.network_id_input(), "");
    assert_eq!(*h.sent.borrow(), vec!["join 8056c2e21c000001"]);
}

#[test]
fn join_before_connect_is_ignored() {
    let mut h = harness(false);
    h.window.set_network_id_input("8056c2e21c000001");
    h.window.join_network().unwrap();
    assert_eq!(h.window.network_id_input(), "");
    assert!(h.sent.borrow().is_empty());
}

#[test]
fn rejected_join_does_not_hide_unresponsive_warning() {
    let mut h = harness(false);
    let mut notices = NoticeQueue::default();
    for _ in 0..3 {
        if h.window.tick().unwrap() == TickOutcome::ServiceUnresponsive {
            notices.push(Notice::unresponsive());
        }
    }

    h.window.set_network_id_input("1234");
    if h.window.join_network().is_err() {
        notices.push(Notice::invalid_network_id());
    }
    assert_eq!(notices.len(), 2);
    assert_eq!(notices.current().unwrap().title, UNRESPONSIVE_TITLE);

    notices.dismiss();
    assert_eq!(notices.current(), Some(&Notice::invalid_network_id()));
    notices.dismiss();
    assert!(notices.is_empty());
}

#[test]
fn repeated_notice_is_queued_once() {
    let mut notices = NoticeQueue::default();
    assert!(notices.push(Notice::invalid_network_id()));
    assert!(!notices.push(Notice::invalid_network_id()));
    assert!(notices.push(Notice::unresponsive()));
    assert_eq!(notices.len(), 2);

    notices.dismiss();
    assert!(notices.push(Notice::invalid_network_id()));
}
