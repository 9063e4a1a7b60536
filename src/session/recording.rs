use super::*;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record connection and command events only.
    KeyEventsOnly,
    /// Also record every byte sent and received.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep `sent` and `received` events.
    pub keep_raw_chunks: bool,
    /// Merge consecutive `received` events into one.
    pub merge_received_chunks: bool,
    /// Keep `command_finished` events.
    pub keep_command_events: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: true,
            merge_received_chunks: true,
            keep_command_events: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected {
        device_addr: String,
    },
    ConnectFailed {
        device_addr: String,
        reason: String,
    },
    Sent {
        data: String,
    },
    Received {
        data: String,
    },
    /// The peer closed the connection.
    Disconnected,
    /// The client closed the connection.
    Closed {
        device_addr: String,
    },
    CommandFinished {
        device: String,
        command: String,
        success: bool,
        clean_output: String,
    },
}

impl SessionEvent {
    fn is_raw(&self) -> bool {
        matches!(self, SessionEvent::Sent { .. } | SessionEvent::Received { .. })
    }
}

/// In-memory session recorder. Clones share the same entries.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record an event allowed by the current level.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConsoleError> {
        match self.level {
            SessionRecordLevel::Off => return Ok(()),
            SessionRecordLevel::KeyEventsOnly if event.is_raw() => return Ok(()),
            _ => {}
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConsoleError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConsoleError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConsoleError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| ConsoleError::Internal(format!("record encode error: {e}")))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConsoleError> {
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)
                .map_err(|e| ConsoleError::ReplayMismatch(format!("record decode error: {e}")))?;
            parsed.push(entry);
        }
        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Sorts events by timestamp, then drops or merges noisy events.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, ConsoleError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut indexed = recorder
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let mut normalized: Vec<SessionRecordEntry> = Vec::with_capacity(indexed.len());
        for (_, entry) in indexed {
            match &entry.event {
                event if event.is_raw() && !options.keep_raw_chunks => continue,
                SessionEvent::CommandFinished { .. } if !options.keep_command_events => continue,
                SessionEvent::Received { data } if options.merge_received_chunks => {
                    if let Some(SessionRecordEntry {
                        event: SessionEvent::Received { data: previous },
                        ..
                    }) = normalized.last_mut()
                    {
                        previous.push_str(data);
                        continue;
                    }
                }
                _ => {}
            }
            normalized.push(entry);
        }

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(normalized)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Wraps a connector and records everything its transports do.
pub struct RecordingConnector<C: Connector> {
    inner: C,
    recorder: SessionRecorder,
}

impl<C: Connector> RecordingConnector<C> {
    pub fn new(inner: C, recorder: SessionRecorder) -> Self {
        Self { inner, recorder }
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }
}

impl<C: Connector> Connector for RecordingConnector<C> {
    type Conn = RecordingTransport<C::Conn>;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self::Conn, ConsoleError> {
        let device_addr = format!("{host}:{port}");
        match self.inner.connect(host, port, timeout).await {
            Ok(inner) => {
                let _ = self.recorder.record_event(SessionEvent::Connected {
                    device_addr: device_addr.clone(),
                });
                Ok(RecordingTransport {
                    inner,
                    recorder: self.recorder.clone(),
                    device_addr,
                })
            }
            Err(err) => {
                let _ = self.recorder.record_event(SessionEvent::ConnectFailed {
                    device_addr,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

/// A transport whose traffic is copied into a [`SessionRecorder`].
pub struct RecordingTransport<T: Transport> {
    inner: T,
    recorder: SessionRecorder,
    device_addr: String,
}

impl<T: Transport> Transport for RecordingTransport<T> {
    async fn send(&mut self, data: &[u8]) -> Result<(), ConsoleError> {
        let _ = self.recorder.record_event(SessionEvent::Sent {
            data: String::from_utf8_lossy(data).into_owned(),
        });
        self.inner.send(data).await
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, ConsoleError> {
        match self.inner.read_available().await {
            Ok(data) => {
                if !data.is_empty() {
                    let _ = self.recorder.record_event(SessionEvent::Received {
                        data: String::from_utf8_lossy(&data).into_owned(),
                    });
                }
                Ok(data)
            }
            Err(ConsoleError::ConnectionClosed) => {
                let _ = self.recorder.record_event(SessionEvent::Disconnected);
                Err(ConsoleError::ConnectionClosed)
            }
            Err(err) => Err(err),
        }
    }

    async fn close(&mut self) {
        self.inner.close().await;
        let _ = self.recorder.record_event(SessionEvent::Closed {
            device_addr: self.device_addr.clone(),
        });
    }
}

#[derive(Debug)]
struct ReplayState {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl ReplayState {
    /// Index of the next transport event, skipping command bookkeeping.
    fn peek(&self) -> Option<usize> {
        (self.cursor..self.entries.len())
            .find(|&i| !matches!(self.entries[i].event, SessionEvent::CommandFinished { .. }))
    }
}

/// Plays a recording back as a connector, for offline regression tests.
///
/// Connections must be opened, written and closed in the recorded order.
/// Received data is handed out one recorded chunk per read; output a live
/// session never read is skipped when the next write happens.
#[derive(Debug, Clone)]
pub struct ReplayConnector {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayConnector {
    pub fn from_recorder(recorder: &SessionRecorder) -> Result<Self, ConsoleError> {
        Ok(Self::from_entries(recorder.entries()?))
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConsoleError> {
        Self::from_recorder(&SessionRecorder::from_jsonl(jsonl)?)
    }

    pub fn from_entries(entries: Vec<SessionRecordEntry>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState { entries, cursor: 0 })),
        }
    }

    /// Number of events not yet consumed, command events excluded.
    pub fn remaining(&self) -> usize {
        self.state
            .lock()
            .map(|state| {
                state.entries[state.cursor.min(state.entries.len())..]
                    .iter()
                    .filter(|e| !matches!(e.event, SessionEvent::CommandFinished { .. }))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn lock_state(state: &Mutex<ReplayState>) -> Result<std::sync::MutexGuard<'_, ReplayState>, ConsoleError> {
    state
        .lock()
        .map_err(|e| ConsoleError::Internal(format!("replay lock error: {e}")))
}

impl Connector for ReplayConnector {
    type Conn = ReplayTransport;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        _timeout: Duration,
    ) -> Result<ReplayTransport, ConsoleError> {
        let addr = format!("{host}:{port}");
        let mut state = lock_state(&self.state)?;
        let Some(index) = state.peek() else {
            return Err(ConsoleError::ReplayMismatch(format!(
                "connect to {addr} after end of recording"
            )));
        };
        state.cursor = index + 1;
        match state.entries[index].event.clone() {
            SessionEvent::Connected { device_addr } if device_addr == addr => Ok(ReplayTransport {
                state: self.state.clone(),
                device_addr: addr,
                closed: false,
            }),
            SessionEvent::ConnectFailed {
                device_addr,
                reason,
            } if device_addr == addr => Err(ConsoleError::Connect {
                addr: device_addr,
                reason,
            }),
            other => Err(ConsoleError::ReplayMismatch(format!(
                "connect to {addr}, recording has {other:?}"
            ))),
        }
    }
}

/// One replayed connection.
#[derive(Debug)]
pub struct ReplayTransport {
    state: Arc<Mutex<ReplayState>>,
    device_addr: String,
    closed: bool,
}

impl Transport for ReplayTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), ConsoleError> {
        let text = String::from_utf8_lossy(data);
        let mut state = lock_state(&self.state)?;
        loop {
            let Some(index) = state.peek() else {
                return Err(ConsoleError::ReplayMismatch(format!(
                    "{} sent {:?} after end of recording",
                    self.device_addr, text
                )));
            };
            state.cursor = index + 1;
            match &state.entries[index].event {
                SessionEvent::Received { .. } => continue,
                SessionEvent::Sent { data } if data.as_str() == text.as_ref() => return Ok(()),
                other => {
                    return Err(ConsoleError::ReplayMismatch(format!(
                        "{} sent {:?}, recording has {:?}",
                        self.device_addr, text, other
                    )));
                }
            }
        }
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, ConsoleError> {
        if self.closed {
            return Err(ConsoleError::ConnectionClosed);
        }
        let mut state = lock_state(&self.state)?;
        let Some(index) = state.peek() else {
            return Ok(Vec::new());
        };
        match &state.entries[index].event {
            SessionEvent::Received { data } => {
                let bytes = data.clone().into_bytes();
                state.cursor = index + 1;
                Ok(bytes)
            }
            SessionEvent::Disconnected => {
                state.cursor = index + 1;
                Err(ConsoleError::ConnectionClosed)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let Ok(mut state) = lock_state(&self.state) else {
            return;
        };
        // Skip output nobody read, then consume our close event.
        while let Some(index) = state.peek() {
            match &state.entries[index].event {
                SessionEvent::Received { .. } | SessionEvent::Disconnected => {
                    state.cursor = index + 1;
                }
                SessionEvent::Closed { device_addr } if *device_addr == self.device_addr => {
                    state.cursor = index + 1;
                    break;
                }
                _ => break,
            }
        }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
