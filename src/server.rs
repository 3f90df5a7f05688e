//! The automation server: lifecycle, accept loop, and the in-process query
//! surface. One live server per process; host threads feed the window
//! registry while pool workers answer loopback clients.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::connection;
use crate::error::ServerError;
use crate::finder::ElementFinder;
use crate::host::{HostContext, UiElement};
use crate::pool::WorkerPool;
use crate::timing::{self, LogSink, ReportSink, ScreenReportRow, ScreenTimings};
use crate::window::{WindowHandle, WindowInfo, WindowRegistry};

/// One live server per process, released when that server drops.
static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Handles owned by a started server. All three are created together in
/// `start` and taken together in `stop`.
pub(crate) struct RunState {
    thread: Option<JoinHandle<()>>,
    pool: Option<WorkerPool>,
    listener: Option<TcpListener>,
}

/// State shared between the server handle, the accept-loop thread, and the
/// session workers.
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) registry: WindowRegistry,
    pub(crate) timings: ScreenTimings,
    pub(crate) created_at: DateTime<Local>,
    pub(crate) host: Mutex<Option<Arc<dyn HostContext>>>,
    sink: Mutex<Arc<dyn ReportSink>>,
    state: Mutex<RunState>,
    host_init: Once,
}

impl ServerShared {
    pub(crate) fn new(config: ServerConfig) -> ServerShared {
        ServerShared {
            config,
            registry: WindowRegistry::new(),
            timings: ScreenTimings::new(),
            created_at: Local::now(),
            host: Mutex::new(None),
            sink: Mutex::new(Arc::new(LogSink)),
            state: Mutex::new(RunState {
                thread: None,
                pool: None,
                listener: None,
            }),
            host_init: Once::new(),
        }
    }

    pub(crate) fn host(&self) -> Option<Arc<dyn HostContext>> {
        self.host.lock().clone()
    }
}

/// Embedded command server plus the window registry it serves from.
///
/// Construct one per process, keep it alive for the process lifetime, and
/// wire the host's window callbacks to [`add_window`]/[`remove_window`]/
/// [`set_focused_window`]. Clients connect over loopback TCP; nothing in
/// here panics into or raises to the embedding application.
///
/// [`add_window`]: AutomationServer::add_window
/// [`remove_window`]: AutomationServer::remove_window
/// [`set_focused_window`]: AutomationServer::set_focused_window
pub struct AutomationServer {
    shared: Arc<ServerShared>,
}

impl AutomationServer {
    /// Claims the process-wide instance slot with default configuration.
    pub fn new() -> Result<AutomationServer, ServerError> {
        AutomationServer::with_config(ServerConfig::default())
    }

    /// Claims the process-wide instance slot. At most one live server per
    /// process; a second construction fails until the first is dropped.
    /// Nothing starts until [`install`](Self::install) or
    /// [`start`](Self::start).
    pub fn with_config(config: ServerConfig) -> Result<AutomationServer, ServerError> {
        if INSTANCE_LIVE.swap(true, Ordering::SeqCst) {
            return Err(ServerError::InstanceLive);
        }
        Ok(AutomationServer {
            shared: Arc::new(ServerShared::new(config)),
        })
    }

    /// Wires the host into the server and makes sure it is running.
    ///
    /// Records `host` as current (replacing any previous host), runs
    /// `host.initialize()` the first time a host is installed, and starts
    /// the server if it is not running. Never fails outward: a start
    /// failure is logged and shows up as `is_running() == false`.
    pub fn install(&self, host: Arc<dyn HostContext>) {
        *self.shared.host.lock() = Some(Arc::clone(&host));
        self.shared.host_init.call_once(|| host.initialize());
        if !self.is_running() && !self.start() {
            warn!(
                "automation server not running after install (port {})",
                self.shared.config.port
            );
        }
    }

    /// Launches the accept-loop thread and the worker pool. Returns false
    /// if the accept thread handle already exists, whether or not that
    /// thread is still alive. Returns true as soon as the thread is
    /// spawned; binding happens inside the loop, so a true return does not
    /// mean the port is bound yet.
    pub fn start(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.thread.is_some() {
            return false;
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("uiprobe-accept-{}", self.shared.config.port))
            .spawn(move || accept_loop(shared));
        match spawned {
            Ok(handle) => {
                state.pool = Some(WorkerPool::new(self.shared.config.workers));
                state.thread = Some(handle);
                true
            }
            Err(e) => {
                error!("failed to spawn accept thread: {}", e);
                false
            }
        }
    }

    /// Tears down a started server: dethrones the accept thread, abandons
    /// queued connections, closes the listening socket, and clears the
    /// window registry. Sessions already running see the shutdown flag:
    /// an element wait gives up at its next poll tick and the session
    /// closes after its current reply. The registry is cleared even when
    /// there was nothing to tear down. Returns true only when an accept
    /// thread existed and a bound socket was closed.
    pub fn stop(&self) -> bool {
        let torn_down = {
            let mut state = self.shared.state.lock();
            if state.thread.is_some() {
                state.thread = None;
                if let Some(pool) = state.pool.take() {
                    pool.shutdown_now();
                }
                match state.listener.take() {
                    Some(listener) => {
                        // Dropping inside stop frees the port before stop
                        // returns, so an immediate restart can bind.
                        drop(listener);
                        info!("automation server stopped (port {})", self.shared.config.port);
                        true
                    }
                    None => {
                        warn!("stopping with no bound socket on port {}", self.shared.config.port);
                        false
                    }
                }
            } else {
                false
            }
        };
        self.shared.registry.clear_windows();
        self.shared.registry.clear_focused_window();
        torn_down
    }

    /// True while the accept-loop thread handle exists and the thread has
    /// not finished. Says nothing about the socket.
    pub fn is_running(&self) -> bool {
        match &self.shared.state.lock().thread {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    // Host callback surface.

    pub fn add_window(&self, handle: &WindowHandle) {
        self.shared.registry.add_window(handle);
    }

    pub fn remove_window(&self, handle: &WindowHandle) {
        self.shared.registry.remove_window(handle);
    }

    pub fn set_focused_window(&self, handle: &WindowHandle) {
        self.shared.registry.set_focused_window(handle);
    }

    // In-process query surface.

    pub fn focused_window(&self) -> Option<WindowHandle> {
        self.shared.registry.focused_window()
    }

    pub fn snapshot(&self) -> Vec<WindowHandle> {
        self.shared.registry.snapshot()
    }

    pub fn window_infos(&self) -> Vec<WindowInfo> {
        self.shared.registry.window_infos()
    }

    pub fn timings(&self) -> &ScreenTimings {
        &self.shared.timings
    }

    pub fn find_by_text(&self, text: &str, index: usize, timeout: Duration) -> Option<UiElement> {
        self.shared
            .host()
            .and_then(|host| ElementFinder::new(host).find_by_text(text, index, timeout))
    }

    pub fn find_by_id(&self, id: &str, timeout: Duration) -> Option<UiElement> {
        self.shared
            .host()
            .and_then(|host| ElementFinder::new(host).find_by_id(id, timeout))
    }

    pub fn last_toast(&self, timeout: Duration, exclude: Option<&str>) -> Option<String> {
        self.shared
            .host()
            .and_then(|host| ElementFinder::new(host).last_toast(timeout, exclude))
    }

    /// False when no host is installed.
    pub fn is_audio_active(&self) -> bool {
        self.shared
            .host()
            .map(|host| host.audio_active())
            .unwrap_or(false)
    }

    pub fn set_report_sink(&self, sink: Arc<dyn ReportSink>) {
        *self.shared.sink.lock() = sink;
    }

    /// Renders the current screen timings and hands them to the report
    /// sink on a detached thread. Fire and forget.
    pub fn send_timing_report(&self) {
        let rows: Vec<ScreenReportRow> = self.shared.timings.rows();
        let sink = Arc::clone(&self.shared.sink.lock());
        timing::dispatch_report(rows, sink);
    }

    /// Like [`send_timing_report`](Self::send_timing_report) but for one
    /// screen, typically right after it finished resuming. A screen with
    /// no recorded phases dispatches nothing.
    pub fn send_screen_report(&self, screen: &str) {
        match self.shared.timings.row(screen) {
            Some(row) => {
                let sink = Arc::clone(&self.shared.sink.lock());
                timing::dispatch_report(vec![row], sink);
            }
            None => debug!("no timings recorded for screen {:?}", screen),
        }
    }
}

impl Drop for AutomationServer {
    fn drop(&mut self) {
        self.stop();
        INSTANCE_LIVE.store(false, Ordering::SeqCst);
    }
}

fn is_thread_of_record(state: &RunState, id: ThreadId) -> bool {
    state.thread.as_ref().map(|h| h.thread().id()) == Some(id)
}

/// Accept loop. Binds, registers the listener with the shared state, then
/// polls accept until it is no longer the thread of record. Accept errors
/// never end the loop; only losing the thread-of-record slot or losing the
/// listener does.
fn accept_loop(shared: Arc<ServerShared>) {
    let my_id = thread::current().id();
    let port = shared.config.port;

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("bind failed on 127.0.0.1:{}: {}", port, e);
            return;
        }
    };
    if let Err(e) = listener.set_nonblocking(true) {
        error!("cannot poll listener on port {}: {}", port, e);
        return;
    }

    {
        let mut state = shared.state.lock();
        if !is_thread_of_record(&state, my_id) {
            // Stopped before the bind finished; drop the socket unregistered.
            debug!("server on port {} stopped before listener registration", port);
            return;
        }
        state.listener = Some(listener);
    }
    info!("automation server listening on 127.0.0.1:{}", port);

    loop {
        let state = shared.state.lock();
        if !is_thread_of_record(&state, my_id) {
            return;
        }
        let accepted = match state.listener.as_ref() {
            Some(listener) => listener.accept(),
            None => return,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!("accepted connection from {}", peer);
                let job_shared = Arc::clone(&shared);
                match state.pool.as_ref() {
                    Some(pool) => {
                        let shutdown = pool.shutdown_flag();
                        let submitted = pool.execute(move || {
                            connection::handle_connection(stream, job_shared, shutdown)
                        });
                        if let Err(e) = submitted {
                            debug!("dropping connection from {}: {}", peer, e);
                        }
                    }
                    None => drop(stream),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                drop(state);
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!("accept failed on port {}: {}", port, e);
                drop(state);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}
