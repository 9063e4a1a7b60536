use super::*;

/// Executes commands on device consoles, one session per execution.
///
/// Each execution opens a fresh session, initializes it, runs the command,
/// sanitizes the output and closes the session again, whatever the outcome.
/// Successful results are cached per device, port and command.
pub struct CommandExecutor<C: Connector> {
    connector: Arc<C>,
    profile: Arc<DeviceProfile>,
    cache: ResultCache,
    connect_timeout: Duration,
    init: InitTiming,
    poll: PollSettings,
    cancel: Option<CancellationToken>,
    recorder: Option<SessionRecorder>,
}

impl<C: Connector> Clone for CommandExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            profile: self.profile.clone(),
            cache: self.cache.clone(),
            connect_timeout: self.connect_timeout,
            init: self.init,
            poll: self.poll,
            cancel: self.cancel.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

impl<C: Connector> CommandExecutor<C> {
    /// Creates an executor with default timing and its own cache.
    pub fn new(connector: C, profile: DeviceProfile, cache_ttl: Duration) -> Self {
        Self {
            connector: Arc::new(connector),
            profile: Arc::new(profile),
            cache: ResultCache::new(cache_ttl),
            connect_timeout: crate::config::DEFAULT_CONNECT_TIMEOUT,
            init: InitTiming::default(),
            poll: PollSettings::command(),
            cancel: None,
            recorder: None,
        }
    }

    /// Replaces the cache, e.g. to share one between executors.
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = Arc::new(profile);
        self
    }

    /// Poll settings of [`execute`](Self::execute).
    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_init(mut self, init: InitTiming) -> Self {
        self.init = init;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Checks `token` before connecting and at every poll iteration.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Records a `CommandFinished` event for every execution.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Executes `command`, answering from the cache when a fresh entry exists.
    pub async fn execute(
        &self,
        endpoint: &DeviceEndpoint,
        command: &str,
    ) -> Result<CommandResult, ConsoleError> {
        let key = CacheKey::new(endpoint, command);
        if let Some(mut hit) = self.cache.get(&key).await {
            debug!("{} cache hit for '{}'", endpoint.addr(), command);
            hit.success = true;
            return Ok(hit);
        }

        let result = self
            .run_in_session(endpoint, &[], &self.poll, command, &self.poll)
            .await?;
        if result.is_cacheable() {
            self.cache.insert(key, result.clone()).await;
        }
        Ok(result)
    }

    /// Executes `command` with explicit poll settings, bypassing the cache.
    pub async fn execute_uncached(
        &self,
        endpoint: &DeviceEndpoint,
        command: &str,
        poll: &PollSettings,
    ) -> Result<CommandResult, ConsoleError> {
        self.run_in_session(endpoint, &[], poll, command, poll).await
    }

    /// Runs `preamble` commands, then `command`, in one fresh session.
    ///
    /// Preamble output is discarded; only `command` produces a result. The
    /// session is closed on every path.
    pub async fn run_in_session(
        &self,
        endpoint: &DeviceEndpoint,
        preamble: &[String],
        preamble_poll: &PollSettings,
        command: &str,
        poll: &PollSettings,
    ) -> Result<CommandResult, ConsoleError> {
        if self.is_cancelled() {
            return Err(ConsoleError::Cancelled);
        }

        let mut session = Session::open(
            self.connector.as_ref(),
            endpoint,
            self.profile.clone(),
            self.connect_timeout,
        )
        .await?;

        let result = self
            .drive(&mut session, preamble, preamble_poll, command, poll)
            .await;
        session.close().await;

        if let Some(recorder) = self.recorder.as_ref() {
            let (success, clean_output) = match &result {
                Ok(r) => (r.success, r.clean_output.clone()),
                Err(err) => (false, err.to_string()),
            };
            let _ = recorder.record_event(SessionEvent::CommandFinished {
                device: endpoint.name.clone(),
                command: command.to_string(),
                success,
                clean_output,
            });
        }
        result
    }

    async fn drive(
        &self,
        session: &mut Session<C::Conn>,
        preamble: &[String],
        preamble_poll: &PollSettings,
        command: &str,
        poll: &PollSettings,
    ) -> Result<CommandResult, ConsoleError> {
        let cancel = self.cancel.as_ref();
        session.initialize(&self.init).await?;

        for warmup in preamble {
            let outcome = session.run_command(warmup, preamble_poll, cancel).await?;
            debug!(
                "{} warm-up '{}' returned {} bytes ({:?})",
                session.endpoint().addr(),
                warmup,
                outcome.raw.len(),
                outcome.exit
            );
            if outcome.exit == PollExit::Cancelled {
                return Err(ConsoleError::Cancelled);
            }
        }

        let outcome = session.run_command(command, poll, cancel).await?;
        if !outcome.completed() {
            warn!(
                "{} '{}' ended without completion marker: {:?}",
                session.endpoint().addr(),
                command,
                outcome.exit
            );
        }
        let clean = session.clean(&outcome, command);
        Ok(CommandResult::from_outcome(command, outcome, clean))
    }
}
