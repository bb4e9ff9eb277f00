//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use chatsync::{
    compare, ChatTransport, LiveSink, LiveSubscription, Message, PageRequest, ScopeId, Timestamp,
    TransportError,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const BOT: &str = "6f1c2a7e-33d4-4b7e-9d55-0a1b2c3d4e5f";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn scope(chat: &str) -> ScopeId {
    ScopeId::parse(BOT, chat).unwrap()
}

pub fn msg(id: &str, chat: &str, t: i64, text: &str) -> Message {
    Message {
        id: id.into(),
        chat_id: chat.to_string(),
        sender_id: "u1".to_string(),
        sender_name: "Ann".to_string(),
        text: text.to_string(),
        inserted_at: Timestamp(t),
    }
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.to_string()).collect()
}

/// Poll until `check` holds or two seconds pass.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

struct Registered {
    scope: ScopeId,
    sink: LiveSink,
    cancelled: Arc<AtomicBool>,
}

pub struct MockSubscription {
    cancelled: Arc<AtomicBool>,
}

impl LiveSubscription for MockSubscription {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// A server holding chat history plus hooks for failures and blocking.
pub struct MockTransport {
    history: Mutex<Vec<Message>>,
    fetch_failures: Mutex<VecDeque<TransportError>>,
    subscribe_failures: Mutex<VecDeque<TransportError>>,
    send_failures: Mutex<VecDeque<TransportError>>,
    sinks: Mutex<Vec<Registered>>,
    requests: Mutex<Vec<PageRequest>>,
    fetch_calls: AtomicUsize,
    fetch_entered: AtomicUsize,
    send_calls: AtomicUsize,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    echo_before_reply: AtomicBool,
    reconnect_before_reply: AtomicBool,
    before_reply: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    clock: AtomicI64,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(Vec::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            subscribe_failures: Mutex::new(VecDeque::new()),
            send_failures: Mutex::new(VecDeque::new()),
            sinks: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            fetch_entered: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
            echo_before_reply: AtomicBool::new(false),
            reconnect_before_reply: AtomicBool::new(false),
            before_reply: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            clock: AtomicI64::new(1_000),
        })
    }

    pub fn with_history(messages: Vec<Message>) -> Arc<Self> {
        let transport = Self::new();
        *transport.history.lock() = messages;
        transport
    }

    /// Store a message server-side without pushing it.
    pub fn store(&self, message: Message) {
        self.history.lock().push(message);
    }

    pub fn fail_next_fetch(&self, error: TransportError) {
        self.fetch_failures.lock().push_back(error);
    }

    pub fn fail_next_subscribe(&self, error: TransportError) {
        self.subscribe_failures.lock().push_back(error);
    }

    pub fn fail_next_send(&self, error: TransportError) {
        self.send_failures.lock().push_back(error);
    }

    /// Push the live echo through the stream before `send_message` returns.
    pub fn echo_before_reply(&self, enabled: bool) {
        self.echo_before_reply.store(enabled, Ordering::SeqCst);
    }

    /// Drop and resume the stream after storing a sent message, so the resync
    /// page carries it before `send_message` returns.
    pub fn reconnect_before_reply(&self, enabled: bool) {
        self.reconnect_before_reply.store(enabled, Ordering::SeqCst);
    }

    /// Push `message` while the next send is still waiting for its reply.
    pub fn deliver_before_reply(&self, message: Message) {
        self.before_reply.lock().push(message);
    }

    /// Make every fetch wait for [`MockTransport::release`].
    pub fn hold_fetches(&self) {
        *self.gate.lock() = Some(unbounded());
    }

    /// Let `n` held fetches proceed.
    pub fn release(&self, n: usize) {
        if let Some((sender, _)) = self.gate.lock().as_ref() {
            for _ in 0..n {
                let _ = sender.send(());
            }
        }
    }

    pub fn stop_holding(&self) {
        let gate = self.gate.lock().take();
        if let Some((sender, _)) = gate {
            for _ in 0..64 {
                let _ = sender.send(());
            }
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Fetches that have started, including held ones.
    pub fn fetches_entered(&self) -> usize {
        self.fetch_entered.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.sinks
            .lock()
            .iter()
            .filter(|r| !r.cancelled.load(Ordering::SeqCst))
            .count()
    }

    fn live_sinks(&self) -> Vec<LiveSink> {
        self.sinks
            .lock()
            .iter()
            .filter(|r| !r.cancelled.load(Ordering::SeqCst))
            .map(|r| r.sink.clone())
            .collect()
    }

    /// Any sink ever handed out, cancelled or not.
    pub fn last_sink(&self) -> Option<LiveSink> {
        self.sinks.lock().last().map(|r| r.sink.clone())
    }

    /// Deliver a message to every live subscription of its bot.
    pub fn push(&self, message: Message) {
        for sink in self.live_sinks() {
            sink.on_event(message.clone());
        }
    }

    pub fn push_error(&self, error: TransportError) {
        for sink in self.live_sinks() {
            sink.on_error(error.clone());
        }
    }

    pub fn reconnect(&self) {
        for sink in self.live_sinks() {
            sink.on_reconnect().unwrap();
        }
    }

    pub fn close_streams(&self) {
        let sinks = self.live_sinks();
        for registered in self.sinks.lock().iter() {
            registered.cancelled.store(true, Ordering::SeqCst);
        }
        for sink in sinks {
            sink.on_close();
        }
    }

    fn wait_for_gate(&self) {
        let receiver = self.gate.lock().as_ref().map(|(_, r)| r.clone());
        if let Some(receiver) = receiver {
            let _ = receiver.recv_timeout(Duration::from_secs(5));
        }
    }
}

impl ChatTransport for MockTransport {
    fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Message>, TransportError> {
        self.fetch_entered.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate();
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(error) = self.fetch_failures.lock().pop_front() {
            return Err(error);
        }

        let needle = request.search.to_lowercase();
        let mut matching: Vec<Message> = self
            .history
            .lock()
            .iter()
            .filter(|m| m.chat_id == request.scope.chat_id)
            .filter(|m| needle.is_empty() || m.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        // Newest first, like the real API.
        matching.sort_by(|a, b| compare(b, a));

        Ok(matching
            .into_iter()
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .collect())
    }

    fn subscribe(
        &self,
        scope: &ScopeId,
        sink: LiveSink,
    ) -> Result<Box<dyn LiveSubscription>, TransportError> {
        if let Some(error) = self.subscribe_failures.lock().pop_front() {
            return Err(error);
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        self.sinks.lock().push(Registered {
            scope: scope.clone(),
            sink,
            cancelled: Arc::clone(&cancelled),
        });
        Ok(Box::new(MockSubscription { cancelled }))
    }

    fn send_message(&self, scope: &ScopeId, text: &str) -> Result<Message, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.send_failures.lock().pop_front() {
            return Err(error);
        }

        let message = Message {
            id: format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst)).into(),
            chat_id: scope.chat_id.clone(),
            sender_id: "local".to_string(),
            sender_name: "You".to_string(),
            text: text.to_string(),
            inserted_at: Timestamp(self.clock.fetch_add(1, Ordering::SeqCst)),
        };
        self.store(message.clone());

        let interleaved = std::mem::take(&mut *self.before_reply.lock());
        for other in interleaved {
            self.push(other);
        }
        if self.reconnect_before_reply.load(Ordering::SeqCst) {
            self.reconnect();
        }
        if self.echo_before_reply.load(Ordering::SeqCst) {
            self.push(message.clone());
        }
        Ok(message)
    }
}
