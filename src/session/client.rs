use super::*;

/// One open console plus the state gathered while driving it.
///
/// A session is owned by exactly one operation and is never shared. Callers
/// must [`close`](Session::close) it; dropping an unclosed transport only
/// aborts its background work.
pub struct Session<T: Transport> {
    transport: T,
    endpoint: DeviceEndpoint,
    profile: Arc<DeviceProfile>,
    matcher: DeviceMatcher,
    initialized: bool,
    last_prompt: Option<String>,
    closed: bool,
}

impl<T: Transport> Session<T> {
    /// Wraps an already connected transport.
    pub fn new(
        transport: T,
        endpoint: DeviceEndpoint,
        profile: Arc<DeviceProfile>,
    ) -> Result<Self, ConsoleError> {
        let matcher = DeviceMatcher::new(&profile, &endpoint.name)?;
        Ok(Self {
            transport,
            endpoint,
            profile,
            matcher,
            initialized: false,
            last_prompt: None,
            closed: false,
        })
    }

    /// Connects to `endpoint` and wraps the new transport.
    pub async fn open<C>(
        connector: &C,
        endpoint: &DeviceEndpoint,
        profile: Arc<DeviceProfile>,
        connect_timeout: Duration,
    ) -> Result<Self, ConsoleError>
    where
        C: Connector<Conn = T>,
    {
        // Compile patterns first so a bad profile never costs a connection.
        let matcher = DeviceMatcher::new(&profile, &endpoint.name)?;
        let transport = connector
            .connect(&endpoint.host, endpoint.port, connect_timeout)
            .await?;
        debug!("{} Console session opened", endpoint.addr());
        Ok(Self {
            transport,
            endpoint: endpoint.clone(),
            profile,
            matcher,
            initialized: false,
            last_prompt: None,
            closed: false,
        })
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn matcher(&self) -> &DeviceMatcher {
        &self.matcher
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Most recent bare prompt seen on this console.
    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    /// Brings the console to a privileged prompt with paging disabled.
    ///
    /// Wakes the console with a bare line, enters privileged mode, then sends
    /// each terminal command of the profile. Responses are discarded. A
    /// terminal command that fails is logged and skipped since device
    /// families support different subsets.
    pub async fn initialize(&mut self, timing: &InitTiming) -> Result<(), ConsoleError> {
        let addr = self.endpoint.addr();
        if !timing.settle.is_zero() {
            tokio::time::sleep(timing.settle).await;
        }
        let banner = self.read_text().await?;
        self.observe_prompt(&banner);

        self.send_line("").await?;
        tokio::time::sleep(timing.after_wake).await;
        let woke = self.read_text().await?;
        self.observe_prompt(&woke);
        trace!("{} wake response: {:?}", addr, woke);

        if let Some(privileged) = self.profile.privileged_command.clone() {
            self.send_line(&privileged).await?;
            tokio::time::sleep(timing.after_privileged).await;
            let response = self.read_text().await?;
            self.observe_prompt(&response);
            trace!("{} privileged response: {:?}", addr, response);
        }

        let terminal_commands = self.profile.terminal_commands.clone();
        for command in &terminal_commands {
            if let Err(err) = self.send_line(command).await {
                warn!("{} terminal command '{}' failed: {}", addr, command, err);
                continue;
            }
            tokio::time::sleep(timing.after_terminal_command).await;
            match self.read_text().await {
                Ok(response) => self.observe_prompt(&response),
                Err(err) => debug!("{} no response to '{}': {}", addr, command, err),
            }
        }

        self.initialized = true;
        debug!(
            "{} Session initialized, prompt {:?}",
            addr,
            self.last_prompt.as_deref().unwrap_or("<unknown>")
        );
        Ok(())
    }

    /// Sends `line` followed by the profile's line ending.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ConsoleError> {
        trace!("{} >>> {:?}", self.endpoint.addr(), line);
        let mut data = String::with_capacity(line.len() + self.profile.line_ending.len());
        data.push_str(line);
        data.push_str(&self.profile.line_ending);
        self.transport.send(data.as_bytes()).await
    }

    /// Reads whatever is buffered, decoded as text.
    pub async fn read_text(&mut self) -> Result<String, ConsoleError> {
        let bytes = self.transport.read_available().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Sends `command` and polls until its output appears complete.
    ///
    /// Stale output left over from earlier steps is drained first so a late
    /// prompt cannot end the new command's loop.
    pub async fn run_command(
        &mut self,
        command: &str,
        poll: &PollSettings,
        cancel: Option<&CancellationToken>,
    ) -> Result<PollOutcome, ConsoleError> {
        let stale = self.read_text().await?;
        if !stale.is_empty() {
            trace!("{} discarding stale output {:?}", self.endpoint.addr(), stale);
            self.observe_prompt(&stale);
        }
        self.send_line(command).await?;
        self.poll_output(poll, cancel).await
    }

    /// The poll loop shared by every command and retrieval strategy.
    ///
    /// Each iteration sleeps one interval and reads. A chunk with a pagination
    /// prompt is answered with the pager keystroke and never checked for
    /// completion. Other data is checked against the completion markers. An
    /// empty read only ends the loop once `empty_read_threshold` empty reads
    /// happened in a row AND `idle_grace` passed since the last data.
    /// Deadline expiry and cancellation return the partial buffer.
    pub async fn poll_output(
        &mut self,
        poll: &PollSettings,
        cancel: Option<&CancellationToken>,
    ) -> Result<PollOutcome, ConsoleError> {
        let addr = self.endpoint.addr();
        let started = Instant::now();
        let deadline = started + poll.max_wait;
        let mut raw = String::new();
        let mut empty_reads = 0u32;
        let mut last_data = started;
        let mut chunks = 0usize;
        let mut pages = 0usize;

        let exit = loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                break PollExit::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                break PollExit::Deadline;
            }
            tokio::time::sleep(poll.poll_interval.min(deadline - now)).await;

            let chunk = match self.read_text().await {
                Ok(chunk) => chunk,
                Err(ConsoleError::ConnectionClosed) if !raw.is_empty() => {
                    debug!("{} Console closed after {} bytes", addr, raw.len());
                    break PollExit::Disconnected;
                }
                Err(err) => return Err(err),
            };

            if chunk.is_empty() {
                empty_reads += 1;
                if empty_reads >= poll.empty_read_threshold
                    && last_data.elapsed() >= poll.idle_grace
                {
                    break PollExit::Idle;
                }
                continue;
            }

            trace!("{} <<< {:?}", addr, chunk);
            chunks += 1;
            empty_reads = 0;
            last_data = Instant::now();

            if self.matcher.has_pager(&chunk) {
                pages += 1;
                raw.push_str(&chunk);
                self.transport
                    .send(self.profile.pager_keystroke.as_bytes())
                    .await?;
                trace!("{} answered pager prompt #{}", addr, pages);
                continue;
            }

            // Window from the last unterminated line, so markers split
            // across reads are still seen whole.
            let tail_start = raw.rfind('\n').map(|i| i + 1).unwrap_or(0);
            let mut window = String::with_capacity(raw.len() - tail_start + chunk.len());
            window.push_str(&raw[tail_start..]);
            window.push_str(&chunk);
            raw.push_str(&chunk);

            if self.matcher.is_complete(&window) {
                break PollExit::Completed;
            }
        };

        if let Some(prompt) = self.matcher.last_prompt(&raw) {
            self.last_prompt = Some(prompt);
        }
        let elapsed = started.elapsed();
        debug!(
            "{} poll finished: {:?} after {:?}, {} bytes, {} chunks, {} pages",
            addr,
            exit,
            elapsed,
            raw.len(),
            chunks,
            pages
        );
        Ok(PollOutcome {
            raw,
            exit,
            chunks,
            pages,
            elapsed,
        })
    }

    /// Sanitizes `outcome` for `command` with this session's patterns.
    pub fn clean(&self, outcome: &PollOutcome, command: &str) -> String {
        sanitize(&outcome.raw, command, &self.matcher)
    }

    /// Closes the transport. Calling it twice is harmless.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.close().await;
        debug!("{} Console session closed", self.endpoint.addr());
    }

    fn observe_prompt(&mut self, text: &str) {
        if let Some(prompt) = self.matcher.last_prompt(text) {
            self.last_prompt = Some(prompt);
        }
    }
}
