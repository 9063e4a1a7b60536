//! Deterministic in-memory consoles.
//!
//! A [`ScriptedConnector`] serves [`ScriptedDevice`]s keyed by console port.
//! Every read hands out at most one queued chunk, so a script controls how
//! output is split across reads. An empty string chunk produces an empty read.

use super::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Scripted behavior of one console.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    prompt: String,
    refuse: bool,
    greeting: Option<String>,
    replies: HashMap<String, ReplySequence>,
    hang_up_after: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ReplySequence {
    responses: Vec<Vec<String>>,
    next: usize,
}

impl ReplySequence {
    /// Returns the next response; the last one repeats forever.
    fn take(&mut self) -> Vec<String> {
        let index = self.next.min(self.responses.len().saturating_sub(1));
        self.next += 1;
        self.responses.get(index).cloned().unwrap_or_default()
    }
}

impl ScriptedDevice {
    /// A console answering unknown lines with an echo and `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            refuse: false,
            greeting: None,
            replies: HashMap::new(),
            hang_up_after: None,
        }
    }

    /// A console whose connection attempts are refused.
    pub fn refusing() -> Self {
        let mut device = Self::new("");
        device.refuse = true;
        device
    }

    /// Output available right after connecting.
    pub fn greeting(mut self, text: impl Into<String>) -> Self {
        self.greeting = Some(text.into());
        self
    }

    /// Adds one response to `input`, delivered as `chunks` on successive reads.
    ///
    /// Calling it again for the same input queues another response; the last
    /// response is repeated once the sequence is used up. The input `" "` is
    /// the pager keystroke.
    pub fn reply<I, S>(mut self, input: &str, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies
            .entry(input.to_string())
            .or_default()
            .responses
            .push(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Closes the connection once the response to `input` has been read.
    pub fn hang_up_after(mut self, input: &str) -> Self {
        self.hang_up_after = Some(input.to_string());
        self
    }

    fn respond(&mut self, input: &str, is_line: bool) -> Vec<String> {
        if let Some(sequence) = self.replies.get_mut(input) {
            return sequence.take();
        }
        if !is_line {
            return Vec::new();
        }
        if input.is_empty() {
            vec![format!("\r\n{}", self.prompt)]
        } else {
            vec![format!("{}\r\n{}", input, self.prompt)]
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    devices: HashMap<u16, ScriptedDevice>,
    connects: HashMap<u16, usize>,
    lines: HashMap<u16, Vec<String>>,
    keystrokes: HashMap<u16, Vec<String>>,
}

/// Connector serving scripted consoles. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, port: u16, device: ScriptedDevice) {
        if let Ok(mut state) = self.state.lock() {
            state.devices.insert(port, device);
        }
    }

    /// Builder form of [`add_device`](Self::add_device).
    pub fn with_device(self, port: u16, device: ScriptedDevice) -> Self {
        self.add_device(port, device);
        self
    }

    /// Number of successful connections made to `port`.
    pub fn connect_count(&self, port: u16) -> usize {
        self.state
            .lock()
            .map(|state| state.connects.get(&port).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Lines sent to `port`, without line endings.
    pub fn sent(&self, port: u16) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.lines.get(&port).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Raw keystrokes (data without a line ending) sent to `port`.
    pub fn keystrokes(&self, port: u16) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.keystrokes.get(&port).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ScriptState>, ConsoleError> {
        self.state
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("script lock error: {e}")))
    }
}

impl Connector for ScriptedConnector {
    type Conn = ScriptedTransport;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        _timeout: Duration,
    ) -> Result<ScriptedTransport, ConsoleError> {
        let addr = format!("{host}:{port}");
        let mut state = self.lock()?;
        let greeting = match state.devices.get(&port) {
            None => {
                return Err(ConsoleError::Connect {
                    addr,
                    reason: "connection refused".to_string(),
                });
            }
            Some(device) if device.refuse => {
                return Err(ConsoleError::Connect {
                    addr,
                    reason: "connection refused".to_string(),
                });
            }
            Some(device) => device.greeting.clone(),
        };
        *state.connects.entry(port).or_default() += 1;
        drop(state);

        Ok(ScriptedTransport {
            port,
            state: self.state.clone(),
            pending: greeting.into_iter().collect(),
            hanging_up: false,
            closed: false,
        })
    }
}

/// One connection to a scripted console.
#[derive(Debug)]
pub struct ScriptedTransport {
    port: u16,
    state: Arc<Mutex<ScriptState>>,
    pending: VecDeque<String>,
    hanging_up: bool,
    closed: bool,
}

impl Transport for ScriptedTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), ConsoleError> {
        if self.closed || (self.hanging_up && self.pending.is_empty()) {
            return Err(ConsoleError::ConnectionClosed);
        }
        let text = String::from_utf8_lossy(data).into_owned();
        let is_line = text.ends_with('\n');
        let input = if is_line {
            text.trim_end_matches(['\r', '\n']).to_string()
        } else {
            text
        };

        let mut state = self
            .state
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("script lock error: {e}")))?;
        let log = if is_line {
            &mut state.lines
        } else {
            &mut state.keystrokes
        };
        log.entry(self.port).or_default().push(input.clone());

        let Some(device) = state.devices.get_mut(&self.port) else {
            return Err(ConsoleError::ConnectionClosed);
        };
        let chunks = device.respond(&input, is_line);
        if device.hang_up_after.as_deref() == Some(input.as_str()) {
            self.hanging_up = true;
        }
        self.pending.extend(chunks);
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, ConsoleError> {
        if self.closed {
            return Err(ConsoleError::ConnectionClosed);
        }
        match self.pending.pop_front() {
            Some(chunk) => Ok(chunk.into_bytes()),
            None if self.hanging_up => Err(ConsoleError::ConnectionClosed),
            None => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_and_refusing_ports_fail_to_connect() {
        let connector = ScriptedConnector::new().with_device(5002, ScriptedDevice::refusing());
        for port in [5001, 5002] {
            let err = connector
                .connect("127.0.0.1", port, Duration::from_secs(1))
                .await
                .expect_err("should refuse");
            assert!(err.is_connect_error());
        }
        assert_eq!(connector.connect_count(5002), 0);
    }

    #[tokio::test]
    async fn replies_are_delivered_one_chunk_per_read() {
        let connector = ScriptedConnector::new().with_device(
            5000,
            ScriptedDevice::new("R1#").reply("show clock", ["show clock\r\n", "", "12:00\r\nR1#"]),
        );
        let mut conn = connector
            .connect("127.0.0.1", 5000, Duration::from_secs(1))
            .await
            .expect("connect");

        conn.send(b"show clock\r\n").await.expect("send");
        assert_eq!(conn.read_available().await.expect("read"), b"show clock\r\n");
        assert!(conn.read_available().await.expect("read").is_empty());
        assert_eq!(conn.read_available().await.expect("read"), b"12:00\r\nR1#");
        assert!(conn.read_available().await.expect("read").is_empty());
        assert_eq!(connector.sent(5000), vec!["show clock"]);
    }

    #[tokio::test]
    async fn last_response_repeats() {
        let connector = ScriptedConnector::new().with_device(
            5000,
            ScriptedDevice::new("R1#")
                .reply("show run", ["first"])
                .reply("show run", ["second"]),
        );
        let mut conn = connector
            .connect("127.0.0.1", 5000, Duration::from_secs(1))
            .await
            .expect("connect");

        for expected in ["first", "second", "second"] {
            conn.send(b"show run\r\n").await.expect("send");
            assert_eq!(conn.read_available().await.expect("read"), expected.as_bytes());
        }
    }

    #[tokio::test]
    async fn unscripted_lines_echo_with_prompt_and_keystrokes_stay_silent() {
        let connector = ScriptedConnector::new()
            .with_device(5000, ScriptedDevice::new("R1#").greeting("\r\nR1>"));
        let mut conn = connector
            .connect("127.0.0.1", 5000, Duration::from_secs(1))
            .await
            .expect("connect");

        assert_eq!(conn.read_available().await.expect("read"), b"\r\nR1>");
        conn.send(b"\r\n").await.expect("send");
        assert_eq!(conn.read_available().await.expect("read"), b"\r\nR1#");
        conn.send(b" ").await.expect("send");
        assert!(conn.read_available().await.expect("read").is_empty());
        assert_eq!(connector.keystrokes(5000), vec![" "]);

        conn.close().await;
        assert!(matches!(
            conn.read_available().await,
            Err(ConsoleError::ConnectionClosed)
        ));
    }
}
