//! In-memory link for driving sessions in unit tests.

use std::sync::{Arc, Mutex};

use frames::Frame;
use tokio::sync::mpsc;

use super::connection::{Connector, Link, LinkEvent, LinkTarget};

#[derive(Debug, Default)]
pub struct LinkRecord {
    pub connected: bool,
    pub sent: Vec<Frame>,
    pub dropped: usize,
    pub reconnects: usize,
    pub closed: bool,
}

struct Opened {
    target: LinkTarget,
    listener: mpsc::UnboundedSender<LinkEvent>,
    record: Arc<Mutex<LinkRecord>>,
}

#[derive(Default)]
struct MockState {
    start_connected: bool,
    opened: Vec<Opened>,
}

/// Records every link it opens; clones share state with the original.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Connector whose links report themselves connected from the start.
    pub fn online() -> Self {
        let connector = Self::default();
        connector.state.lock().expect("mock state").start_connected = true;
        connector
    }

    pub fn opens(&self) -> usize {
        self.state.lock().expect("mock state").opened.len()
    }

    pub fn target(&self, index: usize) -> LinkTarget {
        self.state.lock().expect("mock state").opened[index].target.clone()
    }

    /// Deliver `event` on the listener of the most recent link.
    pub fn emit(&self, event: LinkEvent) -> bool {
        let state = self.state.lock().expect("mock state");
        let Some(last) = state.opened.last() else {
            return false;
        };
        if event == LinkEvent::Connected {
            last.record.lock().expect("link record").connected = true;
        }
        if matches!(event, LinkEvent::Disconnected { .. } | LinkEvent::Unauthorized) {
            last.record.lock().expect("link record").connected = false;
        }
        last.listener.send(event).is_ok()
    }

    /// Deliver `event` on the listener of link number `index`.
    pub fn emit_to(&self, index: usize, event: LinkEvent) -> bool {
        self.state.lock().expect("mock state").opened[index].listener.send(event).is_ok()
    }

    pub fn emit_frame(&self, frame: Frame) -> bool {
        self.emit(LinkEvent::Frame(frame))
    }

    /// Run `f` against the record of link number `index`.
    pub fn with_link<T>(&self, index: usize, f: impl FnOnce(&mut LinkRecord) -> T) -> T {
        let record = Arc::clone(&self.state.lock().expect("mock state").opened[index].record);
        let mut record = record.lock().expect("link record");
        f(&mut record)
    }

    /// Frames sent on the most recent link, oldest first.
    pub fn sent(&self) -> Vec<Frame> {
        let last = self.opens().saturating_sub(1);
        if self.opens() == 0 {
            return Vec::new();
        }
        self.with_link(last, |p| p.sent.clone())
    }

    /// Event names sent on the most recent link.
    pub fn sent_events(&self) -> Vec<String> {
        self.sent().into_iter().map(|f| f.event).collect()
    }

    pub fn clear_sent(&self) {
        if self.opens() > 0 {
            self.with_link(self.opens() - 1, |p| p.sent.clear());
        }
    }
}

impl Connector for MockConnector {
    type Link = MockLink;

    fn open(&self, target: &LinkTarget, listener: mpsc::UnboundedSender<LinkEvent>) -> MockLink {
        let mut state = self.state.lock().expect("mock state");
        let record = Arc::new(Mutex::new(LinkRecord { connected: state.start_connected, ..LinkRecord::default() }));
        state.opened.push(Opened { target: target.clone(), listener, record: Arc::clone(&record) });
        MockLink { record }
    }
}

pub struct MockLink {
    record: Arc<Mutex<LinkRecord>>,
}

impl Link for MockLink {
    fn send(&self, frame: Frame) -> bool {
        let mut record = self.record.lock().expect("link record");
        if record.connected && !record.closed {
            record.sent.push(frame);
            true
        } else {
            record.dropped += 1;
            false
        }
    }

    fn is_connected(&self) -> bool {
        let record = self.record.lock().expect("link record");
        record.connected && !record.closed
    }

    fn reconnect(&self) {
        self.record.lock().expect("link record").reconnects += 1;
    }

    fn close(&self) {
        let mut record = self.record.lock().expect("link record");
        record.closed = true;
        record.connected = false;
    }
}
