//! Connection management for AMI

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::{
    action::ActionChannel,
    command::{AmiAction, AmiResponse},
    config::{AmiConnectOptions, Credentials},
    constants::{LOGIN_SUCCESS_MARKER, SOCKET_BUF_SIZE},
    error::{AmiError, AmiResult},
    event::AmiEvent,
    headers::AmiHeader,
    keepalive,
    listener::{AmiEventStream, EventBus, EventFilter, ListenerId},
    protocol::{AmiMessage, FrameDecoder, MessageKind},
};

/// Connection state of an [`AmiClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session and no reconnection in progress.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Socket open, banner and login exchange in progress.
    Authenticating,
    /// Logged in; reader and keep-alive running.
    Connected,
    /// Session lost; background reconnection pending.
    ReconnectWait,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectWait => "waiting to reconnect",
        };
        f.write_str(name)
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Keep-alive ping could not be sent or went unanswered
    ProbeFailed(String),
    /// The inbound byte stream could not be framed
    ProtocolError(String),
    /// Client called disconnect()
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ProbeFailed(msg) => write!(f, "keep-alive failed: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Lifecycle callback, invoked with the client and the disconnect reason.
pub type LifecycleCallback = Arc<dyn Fn(&AmiClient, &DisconnectReason) + Send + Sync>;

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(host: &str, port: u16, limit: Duration) -> AmiResult<TcpStream> {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(AmiError::Io(e))
        }
        Err(_) => {
            warn!("[CONNECT] TCP connect timed out after {:?}", limit);
            Err(AmiError::timeout(limit))
        }
    }
}

/// Unsplit stream used for the banner and login exchange, before the reader
/// task owns the read side.
struct Handshake {
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buffer: Vec<u8>,
    backlog: VecDeque<AmiMessage>,
    read_timeout: Duration,
}

impl Handshake {
    fn new(stream: TcpStream, read_timeout: Duration) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            read_buffer: vec![0u8; SOCKET_BUF_SIZE],
            backlog: VecDeque::new(),
            read_timeout,
        }
    }

    async fn fill(&mut self) -> AmiResult<usize> {
        let bytes_read = match timeout(self.read_timeout, self.stream.read(&mut self.read_buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(AmiError::Io(e)),
            Err(_) => return Err(AmiError::timeout(self.read_timeout)),
        };
        trace!("[RECV] Read {} bytes from socket", bytes_read);
        if bytes_read == 0 {
            return Err(AmiError::ConnectionClosed);
        }
        Ok(bytes_read)
    }

    /// Read the single-line greeting.
    async fn read_banner(&mut self) -> AmiResult<String> {
        loop {
            if let Some(line) = self
                .decoder
                .take_line()
            {
                return Ok(line);
            }
            let n = self.fill().await?;
            self.decoder
                .push(&self.read_buffer[..n]);
        }
    }

    /// Read the next decoded record.
    async fn recv_message(&mut self) -> AmiResult<AmiMessage> {
        loop {
            if let Some(message) = self
                .backlog
                .pop_front()
            {
                return Ok(message);
            }
            let n = self.fill().await?;
            let messages = self
                .decoder
                .decode(&self.read_buffer[..n])?;
            self.backlog
                .extend(messages);
        }
    }

    /// Send `Login` and wait for its response.
    ///
    /// Success is recognized by the literal `Success` anywhere in the reply.
    async fn login(&mut self, credentials: &Credentials) -> AmiResult<()> {
        let wire = AmiAction::login(credentials.username(), credentials.secret()).to_wire_format()?;
        debug!("Sending action: Login [REDACTED]");
        self.stream
            .write_all(wire.as_bytes())
            .await
            .map_err(AmiError::Io)?;

        let response = loop {
            let message = self
                .recv_message()
                .await?;
            match message.kind {
                MessageKind::Response => break message,
                MessageKind::Event => debug!("Ignoring event {} during login", message.name),
            }
        };

        if !response
            .raw
            .contains(LOGIN_SUCCESS_MARKER)
        {
            let message = response
                .fields
                .get(AmiHeader::Message.as_str())
                .cloned()
                .unwrap_or_else(|| response.raw.clone());
            return Err(AmiError::auth_failed(message));
        }

        debug!("Authentication successful");
        Ok(())
    }

    fn into_established(self, banner: String) -> Established {
        let (reader, writer) = self
            .stream
            .into_split();
        Established {
            reader,
            writer,
            decoder: self.decoder,
            backlog: self.backlog,
            banner,
        }
    }
}

/// An authenticated socket not yet handed to the background tasks.
struct Established {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    /// Records decoded during the handshake after the login response
    backlog: VecDeque<AmiMessage>,
    banner: String,
}

enum Install {
    Installed,
    AlreadyConnected,
    ShutDown,
}

/// Background tasks of one connection generation.
struct Session {
    generation: u64,
    reader: AbortHandle,
    probe: AbortHandle,
    supervisor: AbortHandle,
}

impl Session {
    fn abort(self) {
        self.reader.abort();
        self.probe.abort();
        self.supervisor.abort();
    }
}

/// State shared between AmiClient handles and the background tasks
struct Inner {
    credentials: Credentials,
    options: AmiConnectOptions,
    state_tx: watch::Sender<ConnectionState>,
    /// `true` while the client should keep (re)connecting
    running_tx: watch::Sender<bool>,
    bus: Arc<EventBus>,
    actions: Arc<ActionChannel>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    banner: RwLock<Option<String>>,
    on_disconnect: RwLock<Option<LifecycleCallback>>,
    on_reconnect: RwLock<Option<LifecycleCallback>>,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self
            .state_tx
            .send_replace(state);
        if previous != state {
            debug!("Connection state {} -> {}", previous, state);
        }
    }

    /// Move to `state` only while the client is running.
    ///
    /// Background reconnects use this so they never overwrite the
    /// `Disconnected` set by an explicit shutdown. Returns whether the state
    /// was applied.
    fn set_state_while_running(&self, state: ConnectionState) -> bool {
        let mut applied = false;
        self.state_tx
            .send_if_modified(|current| {
                if !self.is_running() {
                    return false;
                }
                applied = true;
                let changed = *current != state;
                if changed {
                    debug!("Connection state {} -> {}", current, state);
                }
                *current = state;
                changed
            });
        applied
    }

    /// State transition for a connection attempt. A background attempt
    /// (`resume`) is abandoned once shutdown was requested.
    fn advance(&self, state: ConnectionState, resume: bool) -> AmiResult<()> {
        if !resume {
            self.set_state(state);
            return Ok(());
        }
        if self.set_state_while_running(state) {
            Ok(())
        } else {
            Err(AmiError::NotConnected)
        }
    }

    fn is_running(&self) -> bool {
        *self
            .running_tx
            .borrow()
    }

    /// Open the socket, read the banner and log in.
    async fn establish(&self, resume: bool) -> AmiResult<Established> {
        let host = self
            .credentials
            .host();
        let port = self
            .credentials
            .port();

        self.advance(ConnectionState::Connecting, resume)?;
        info!("Connecting to Asterisk at {}:{}", host, port);
        let stream = tcp_connect_with_timeout(host, port, self.options.connect_timeout).await?;

        self.advance(ConnectionState::Authenticating, resume)?;
        let mut handshake = Handshake::new(stream, self.options.connect_timeout);
        let banner = handshake
            .read_banner()
            .await?;
        debug!("AMI banner: {}", banner);
        handshake
            .login(&self.credentials)
            .await?;

        Ok(handshake.into_established(banner))
    }

    /// Hand an authenticated socket to a new generation of background tasks.
    ///
    /// A caller-driven connect (`resume == false`) turns the running flag on;
    /// a background reconnect (`resume == true`) only proceeds while it is on.
    async fn install(inner: &Arc<Inner>, established: Established, resume: bool) -> Install {
        let mut session = inner
            .session
            .lock()
            .await;
        if session.is_some() {
            return Install::AlreadyConnected;
        }
        if resume && !inner.is_running() {
            return Install::ShutDown;
        }
        if !resume {
            inner
                .running_tx
                .send_replace(true);
        }

        let generation = inner
            .generation
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let Established {
            reader,
            writer,
            decoder,
            backlog,
            banner,
        } = established;

        *inner
            .banner
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(banner);
        inner
            .actions
            .attach(writer)
            .await;
        inner.set_state(ConnectionState::Connected);

        let reader_task = tokio::spawn(reader_loop(inner.clone(), reader, decoder, backlog));
        let probe_task = tokio::spawn(keepalive::run(
            inner
                .actions
                .clone(),
            inner
                .options
                .keepalive
                .clone(),
        ));
        let reader = reader_task.abort_handle();
        let probe = probe_task.abort_handle();
        let supervisor = tokio::spawn(supervise(inner.clone(), generation, reader_task, probe_task))
            .abort_handle();

        *session = Some(Session {
            generation,
            reader,
            probe,
            supervisor,
        });
        info!(
            "Connected to AMI at {}:{} (generation {})",
            inner
                .credentials
                .host(),
            inner
                .credentials
                .port(),
            generation
        );
        Install::Installed
    }

    /// Route one decoded record: events to listeners, responses to the
    /// waiting action.
    async fn route(&self, message: AmiMessage) {
        match message.kind {
            MessageKind::Event => {
                if let Some(event) = message.into_event() {
                    trace!("Dispatching event {}", event.name());
                    self.bus
                        .dispatch(&event);
                }
            }
            MessageKind::Response => {
                self.actions
                    .deliver(message)
                    .await
            }
        }
    }

    fn notify(inner: &Arc<Inner>, callback: &RwLock<Option<LifecycleCallback>>, reason: &DisconnectReason) {
        let callback = callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            let client = AmiClient {
                inner: inner.clone(),
            };
            if catch_unwind(AssertUnwindSafe(|| callback(&client, reason))).is_err() {
                error!("Lifecycle callback panicked");
            }
        }
    }

    /// End generation `generation` after its reader or probe failed.
    ///
    /// Runs at most once per generation; later calls and calls racing an
    /// explicit disconnect are no-ops.
    async fn handle_disconnect(inner: &Arc<Inner>, generation: u64, reason: DisconnectReason) {
        let running = {
            let mut session = inner
                .session
                .lock()
                .await;
            match session.as_ref() {
                Some(s) if s.generation == generation => {}
                _ => return,
            }
            // Workers are already finished; the caller is the supervisor.
            session.take();
            inner
                .actions
                .detach()
                .await;

            let running = inner.is_running();
            inner.set_state(if running {
                ConnectionState::ReconnectWait
            } else {
                ConnectionState::Disconnected
            });
            running
        };

        warn!("AMI connection lost: {}", reason);
        Inner::notify(inner, &inner.on_disconnect, &reason);

        if running {
            tokio::spawn(reconnect_task(inner.clone(), reason));
        }
    }
}

/// Resolves once the running flag is cleared.
async fn shutdown_requested(mut running_rx: watch::Receiver<bool>) {
    let _ = running_rx
        .wait_for(|running| !*running)
        .await;
}

/// Background reader loop
///
/// Sole reader of the socket for its generation. Returns why the generation
/// ended.
async fn reader_loop(
    inner: Arc<Inner>,
    mut reader: OwnedReadHalf,
    mut decoder: FrameDecoder,
    backlog: VecDeque<AmiMessage>,
) -> DisconnectReason {
    for message in backlog {
        inner
            .route(message)
            .await;
    }

    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];
    let poll_interval = inner
        .options
        .poll_interval;

    loop {
        let read_result = timeout(poll_interval, reader.read(&mut read_buffer)).await;

        match read_result {
            Ok(Ok(0)) => {
                info!("Connection closed (EOF)");
                return DisconnectReason::ConnectionClosed;
            }
            Ok(Ok(n)) => {
                trace!("[RECV] Read {} bytes from socket", n);
                let messages = match decoder.decode(&read_buffer[..n]) {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!("Framing error: {}", e);
                        return DisconnectReason::ProtocolError(e.to_string());
                    }
                };
                for message in messages {
                    inner
                        .route(message)
                        .await;
                }
            }
            Ok(Err(e)) => {
                warn!("Read error: {}", e);
                return DisconnectReason::IoError(e.to_string());
            }
            Err(_) => {
                // Poll timeout, check for shutdown
                if !inner.is_running() {
                    debug!("Reader observed shutdown");
                    return DisconnectReason::ClientRequested;
                }
            }
        }
    }
}

/// Waits for the first of reader and probe to end, then tears the
/// generation down.
async fn supervise(
    inner: Arc<Inner>,
    generation: u64,
    mut reader_task: JoinHandle<DisconnectReason>,
    mut probe_task: JoinHandle<DisconnectReason>,
) {
    let reason = tokio::select! {
        result = &mut reader_task => {
            probe_task.abort();
            result.unwrap_or_else(|e| {
                error!("reader task failed: {}", e);
                DisconnectReason::IoError("reader task failed".to_string())
            })
        }
        result = &mut probe_task => {
            reader_task.abort();
            result.unwrap_or_else(|e| {
                error!("keep-alive task failed: {}", e);
                DisconnectReason::ProbeFailed("keep-alive task failed".to_string())
            })
        }
    };
    Inner::handle_disconnect(&inner, generation, reason).await;
}

/// Boxed so the spawn in `handle_disconnect` names a `Send` future instead
/// of recursing into the reconnect loop's own type.
fn reconnect_task(inner: Arc<Inner>, reason: DisconnectReason) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(reconnect_loop(inner, reason))
}

/// Retry the connection until it succeeds, the policy gives up, or the
/// client shuts down.
async fn reconnect_loop(inner: Arc<Inner>, reason: DisconnectReason) {
    let policy = inner
        .options
        .reconnect
        .clone();
    let mut delay = policy.delay;
    let mut attempts: u32 = 0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(inner.running_tx.subscribe()) => {
                debug!("Reconnect cancelled by shutdown");
                return;
            }
        }

        attempts += 1;
        info!("Attempting to reconnect to AMI (attempt {})", attempts);
        let attempt = tokio::select! {
            result = inner.establish(true) => result,
            _ = shutdown_requested(inner.running_tx.subscribe()) => {
                debug!("Reconnect attempt {} abandoned on shutdown", attempts);
                return;
            }
        };
        match attempt {
            Ok(established) => match Inner::install(&inner, established, true).await {
                Install::Installed => {
                    info!("Reconnected to AMI after {} attempt(s)", attempts);
                    Inner::notify(&inner, &inner.on_reconnect, &reason);
                    return;
                }
                Install::AlreadyConnected => {
                    debug!("Connection already re-established, dropping retry");
                    return;
                }
                Install::ShutDown => {
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                }
            },
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", attempts, e);
                if !inner.is_running() {
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                }
                if !policy.allows(attempts) {
                    error!("Giving up reconnecting after {} attempts", attempts);
                    inner
                        .running_tx
                        .send_replace(false);
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                }
                if !inner.set_state_while_running(ConnectionState::ReconnectWait) {
                    return;
                }
                delay = policy.next_delay(delay);
            }
        }
    }
}

/// AMI client handle (Clone + Send + Sync)
///
/// All clones share one connection, listener registry and lifecycle
/// callbacks. Actions are serialized through the action channel; the
/// background reader task routes responses to the waiting caller and events
/// to listeners.
///
/// Background tasks hold the shared state, so call
/// [`disconnect`](Self::disconnect) to stop reconnecting; dropping the
/// handles alone does not.
#[derive(Clone)]
pub struct AmiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiClient")
            .field("credentials", &self.inner.credentials)
            .field("state", &self.state())
            .finish()
    }
}

impl AmiClient {
    /// Create a disconnected client with default options.
    pub fn new(credentials: Credentials) -> Self {
        Self::with_options(credentials, AmiConnectOptions::default())
    }

    /// Create a disconnected client with custom options.
    pub fn with_options(credentials: Credentials, options: AmiConnectOptions) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (running_tx, _) = watch::channel(false);
        let actions = Arc::new(ActionChannel::new(state_rx, options.action_timeout));

        Self {
            inner: Arc::new(Inner {
                credentials,
                options,
                state_tx,
                running_tx,
                bus: Arc::new(EventBus::new()),
                actions,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                banner: RwLock::new(None),
                on_disconnect: RwLock::new(None),
                on_reconnect: RwLock::new(None),
            }),
        }
    }

    /// Connect and log in. Returns `false` on any failure; the failure is
    /// logged and the state is left `Disconnected`. No retry happens here.
    ///
    /// ```rust,no_run
    /// use asterisk_ami_tokio::{AmiClient, Credentials};
    ///
    /// # async fn example() {
    /// let client = AmiClient::new(Credentials::new("127.0.0.1", 5038, "admin", "secret"));
    /// if !client.connect().await {
    ///     eprintln!("PBX unreachable");
    /// }
    /// # }
    /// ```
    pub async fn connect(&self) -> bool {
        match self
            .try_connect()
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to connect to AMI: {}", e);
                false
            }
        }
    }

    /// Connect and log in, reporting why it failed.
    ///
    /// Returns `Ok` immediately if already connected.
    pub async fn try_connect(&self) -> AmiResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        match self
            .inner
            .establish(false)
            .await
        {
            Ok(established) => match Inner::install(&self.inner, established, false).await {
                Install::Installed | Install::AlreadyConnected => Ok(()),
                Install::ShutDown => Err(AmiError::NotConnected),
            },
            Err(e) => {
                self.inner.set_state(if self.inner.is_running() {
                    ConnectionState::ReconnectWait
                } else {
                    ConnectionState::Disconnected
                });
                Err(e)
            }
        }
    }

    /// Stop the client: clear the running flag, cancel any reconnect wait,
    /// abort the background tasks and close the socket.
    ///
    /// Idempotent and callable from any state. Does not invoke the
    /// disconnect callback.
    pub async fn disconnect(&self) {
        self.inner
            .running_tx
            .send_replace(false);

        let mut session = self
            .inner
            .session
            .lock()
            .await;
        let had_session = session.is_some();
        if let Some(s) = session.take() {
            s.abort();
        }
        self.inner
            .actions
            .detach()
            .await;
        self.inner
            .set_state(ConnectionState::Disconnected);
        drop(session);

        if had_session {
            info!("Disconnected from AMI");
        }
    }

    /// Send `Logoff`, then [`disconnect`](Self::disconnect).
    pub async fn logoff(&self) {
        self.inner
            .running_tx
            .send_replace(false);
        if let Err(e) = self
            .send(AmiAction::logoff())
            .await
        {
            debug!("Logoff not acknowledged: {}", e);
        }
        self.disconnect()
            .await;
    }

    /// Send an action and return the raw response text.
    ///
    /// Returns an empty string when disconnected (without touching the
    /// socket) or on any send/receive failure. Use [`send`](Self::send) for
    /// a typed result.
    pub async fn send_action<K, V>(&self, name: &str, params: &[(K, V)]) -> String
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let action = params
            .iter()
            .fold(AmiAction::new(name), |a, (k, v)| a.param(k, v.as_ref()));
        match self
            .send(action)
            .await
        {
            Ok(response) => response.into_raw(),
            Err(AmiError::NotConnected) => {
                debug!("Not sending {} while {}", name, self.state());
                String::new()
            }
            Err(e) => {
                error!("Failed to send action {}: {}", name, e);
                String::new()
            }
        }
    }

    /// Send an action and wait for its response.
    pub async fn send(&self, action: AmiAction) -> AmiResult<AmiResponse> {
        self.inner
            .actions
            .send(action)
            .await
    }

    /// Send `Ping` and wait for the reply.
    pub async fn ping(&self) -> AmiResult<AmiResponse> {
        self.send(AmiAction::ping())
            .await
    }

    /// Send a list action and collect the events it produces.
    ///
    /// List actions (`SIPpeers`, `PJSIPShowEndpoints`, `CoreShowChannels`,
    /// ...) answer with `EventList: start` and then emit one event per item,
    /// tagged with the request's `ActionID`, closed by an event carrying
    /// `EventList: Complete`. An `ActionID` is generated if the action has
    /// none. Returns the response and the item events, without the closing
    /// event. Item events are also dispatched to matching listeners as usual.
    ///
    /// Fails with [`AmiError::ActionFailed`] on `Response: Error`, and with
    /// a timeout if no event arrives within the action timeout.
    pub async fn send_list_action(&self, action: AmiAction) -> AmiResult<(AmiResponse, Vec<AmiEvent>)> {
        let action = action.ensure_action_id(|| {
            self.inner
                .actions
                .next_action_id()
        });
        let action_id = action
            .action_id()
            .unwrap_or_default()
            .to_string();

        let mut stream = self.event_stream(EventFilter::new().field(AmiHeader::ActionId.as_str(), action_id));
        let response = self
            .send(action)
            .await?
            .into_result()?;

        let is_list = response
            .header(AmiHeader::EventList)
            .is_some_and(|v| v.eq_ignore_ascii_case("start"));
        if !is_list {
            return Ok((response, Vec::new()));
        }

        let limit = self
            .inner
            .options
            .action_timeout;
        let mut events = Vec::new();
        loop {
            match timeout(limit, stream.recv()).await {
                Ok(Some(Ok(event))) => {
                    if event.is_list_complete() {
                        return Ok((response, events));
                    }
                    events.push(event);
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Err(AmiError::ConnectionClosed),
                Err(_) => return Err(AmiError::timeout(limit)),
            }
        }
    }

    /// Register a listener for matching events.
    ///
    /// Callbacks run synchronously on the reader task, in registration
    /// order, one event at a time. They must not block; spawn a task to send
    /// actions in response to an event. Registrations survive reconnects.
    pub fn add_event_listener<F>(&self, callback: F, filter: EventFilter) -> ListenerId
    where
        F: Fn(&AmiEvent) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .subscribe(callback, filter)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.inner
            .bus
            .unsubscribe(id)
    }

    /// Queue matching events on a stream instead of a callback.
    pub fn event_stream(&self, filter: EventFilter) -> AmiEventStream {
        AmiEventStream::register(
            &self.inner.bus,
            filter,
            self.inner
                .options
                .event_queue_size,
        )
    }

    /// Set the callback run when an established session is lost.
    pub fn set_on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&AmiClient, &DisconnectReason) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_disconnect
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Set the callback run when a background reconnect succeeds. It
    /// receives the reason of the disconnect that was recovered from.
    pub fn set_on_reconnect<F>(&self, callback: F)
    where
        F: Fn(&AmiClient, &DisconnectReason) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_reconnect
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Whether a logged-in session is active.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self
            .inner
            .state_tx
            .borrow()
    }

    /// Receiver notified on every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner
            .state_tx
            .subscribe()
    }

    /// Greeting line of the most recent connection.
    pub fn banner(&self) -> Option<String> {
        self.inner
            .banner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Credentials this client logs in with.
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// Number of registered listeners, event streams included.
    pub fn listener_count(&self) -> usize {
        self.inner
            .bus
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::ConnectionClosed.to_string(), "connection closed");
        assert_eq!(
            DisconnectReason::IoError("reset".into()).to_string(),
            "I/O error: reset"
        );
        assert_eq!(
            DisconnectReason::ProbeFailed("timeout".into()).to_string(),
            "keep-alive failed: timeout"
        );
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = AmiClient::new(Credentials::new("127.0.0.1", 5038, "admin", "secret"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client
            .banner()
            .is_none());
    }

    #[tokio::test]
    async fn test_send_action_while_disconnected_is_empty() {
        let client = AmiClient::new(Credentials::new("127.0.0.1", 5038, "admin", "secret"));
        let no_params: &[(&str, &str)] = &[];
        assert_eq!(client.send_action("Ping", no_params).await, "");
        assert!(matches!(client.ping().await, Err(AmiError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = AmiClient::new(Credentials::new("127.0.0.1", 5038, "admin", "secret"));
        client
            .disconnect()
            .await;
        client
            .disconnect()
            .await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_listeners_outlive_connection_state() {
        let client = AmiClient::new(Credentials::new("127.0.0.1", 5038, "admin", "secret"));
        let id = client.add_event_listener(|_| {}, EventFilter::new());
        let stream = client.event_stream(EventFilter::new().whitelist(["Hangup"]));
        assert_eq!(client.listener_count(), 2);
        assert!(client.remove_event_listener(id));
        drop(stream);
        assert_eq!(client.listener_count(), 0);
    }
}
