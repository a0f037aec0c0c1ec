#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dsplink::{BackoffPolicy, ClientConfig, Event, EventKind, JitterPolicy, Subscribe};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

/// In-process stand-in for the audio processor's TCP command port.
///
/// - `get`/`sub` answer `{"param", "val"}` with the stored value (0 if unknown);
/// - `set` stores and echoes the value;
/// - `Fail_*` params answer a JSON-RPC error;
/// - `Silent_*` params are never answered.
pub struct MockDevice {
    port: u16,
    state: Arc<State>,
}

struct State {
    values: Mutex<HashMap<String, Value>>,
    log: Mutex<Vec<Value>>,
    current: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connections: AtomicUsize,
    accepted_at: Mutex<Vec<SystemTime>>,
    mute: AtomicBool,
    kill: broadcast::Sender<()>,
}

impl MockDevice {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (kill, _) = broadcast::channel(4);
        let state = Arc::new(State {
            values: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            connections: AtomicUsize::new(0),
            accepted_at: Mutex::new(Vec::new()),
            mute: AtomicBool::new(false),
            kill,
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.accepted_at.lock().unwrap().push(SystemTime::now());
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(accept_state.clone(), stream));
            }
        });
        Self { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Wall-clock time of every accepted connection, in order.
    pub fn accepted_at(&self) -> Vec<SystemTime> {
        self.state.accepted_at.lock().unwrap().clone()
    }

    pub fn set_value(&self, param: &str, value: Value) {
        self.state
            .values
            .lock()
            .unwrap()
            .insert(param.to_string(), value);
    }

    /// Stops answering (requests are still read and logged).
    pub fn set_mute(&self, mute: bool) {
        self.state.mute.store(mute, Ordering::SeqCst);
    }

    /// Closes every open connection.
    pub fn drop_connections(&self) {
        let _ = self.state.kill.send(());
    }

    /// Stores `value` and pushes an `update` notification on the live connection.
    pub fn push_update(&self, param: &str, value: Value) {
        self.set_value(param, value.clone());
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "update",
            "params": { "param": param, "val": value },
        });
        self.send_raw(format!("{frame}\n").as_bytes());
    }

    /// Writes raw bytes on the live connection.
    pub fn send_raw(&self, bytes: &[u8]) {
        if let Some(tx) = self.state.current.lock().unwrap().as_ref() {
            let _ = tx.send(bytes.to_vec());
        }
    }

    /// Number of logged requests with `method` for `param`.
    pub fn count(&self, method: &str, param: &str) -> usize {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req["method"] == method && req["params"]["param"] == param)
            .count()
    }

    /// Method of the most recent `sub` or `unsub` received for `param`.
    pub fn last_subscription_method(&self, param: &str) -> Option<String> {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|req| req["params"]["param"] == param)
            .filter_map(|req| req["method"].as_str())
            .find(|m| *m == "sub" || *m == "unsub")
            .map(str::to_string)
    }

    /// Waits until a request with `method` for `param` was received and returns it.
    pub async fn wait_request(&self, method: &str, param: &str) -> Value {
        let mut found = None;
        eventually(|| {
            found = self
                .state
                .log
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|req| req["method"] == method && req["params"]["param"] == param)
                .cloned();
            found.is_some()
        })
        .await;
        found.unwrap()
    }
}

async fn serve(state: Arc<State>, stream: TcpStream) {
    let (rd, mut wr) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    *state.current.lock().unwrap() = Some(out_tx.clone());
    let mut kill = state.kill.subscribe();
    let mut lines = BufReader::new(rd).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = answer(&state, &line) {
                        let _ = out_tx.send(format!("{reply}\n").into_bytes());
                    }
                }
                _ => break,
            },
            Some(bytes) = out_rx.recv() => {
                if wr.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            _ = kill.recv() => break,
        }
    }
}

fn answer(state: &State, line: &str) -> Option<Value> {
    let req: Value = serde_json::from_str(line).ok()?;
    state.log.lock().unwrap().push(req.clone());
    if state.mute.load(Ordering::SeqCst) {
        return None;
    }

    let id = req["id"].clone();
    let method = req["method"].as_str().unwrap_or_default();
    let param = req["params"]["param"].as_str().unwrap_or_default().to_string();

    if param.starts_with("Silent_") {
        return None;
    }
    if param.starts_with("Fail_") {
        return Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32602, "message": format!("unknown parameter {param}") },
        }));
    }

    let mut values = state.values.lock().unwrap();
    let result = match method {
        "set" => {
            let val = req["params"]["val"].clone();
            values.insert(param.clone(), val.clone());
            json!({ "param": param, "val": val })
        }
        "get" | "sub" => {
            let val = values.get(&param).cloned().unwrap_or(json!(0));
            json!({ "param": param, "val": val })
        }
        _ => Value::Null,
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

/// Polls `cond` every 10ms for up to 5s.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Client configuration tuned for fast tests against `mock`.
pub fn config(mock: &MockDevice) -> ClientConfig {
    let mut cfg = ClientConfig::new("127.0.0.1");
    cfg.port = mock.port();
    cfg.connect_timeout = Duration::from_secs(1);
    cfg.request_timeout = Duration::from_secs(2);
    cfg.queue_timeout = Duration::from_secs(5);
    cfg.keepalive_interval = Duration::ZERO;
    cfg.grace = Duration::from_secs(1);
    cfg.stable_after = Duration::from_millis(100);
    cfg.backoff = BackoffPolicy {
        first: Duration::from_millis(50),
        max: Duration::from_millis(200),
        factor: 2.0,
        jitter: JitterPolicy::None,
        max_attempts: None,
    };
    cfg
}

/// Event subscriber that records everything it sees.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn find(&self, kind: EventKind) -> Option<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.kind == kind)
            .cloned()
    }

    pub fn events(&self, kind: EventKind) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}
