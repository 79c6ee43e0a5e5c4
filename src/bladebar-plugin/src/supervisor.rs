//! Panel-side supervisor of wrapper processes.
//!
//! Each plugin instance gets its own endpoint and its own wrapper process. Two
//! background tasks watch a worker: one owns the endpoint connection, the other
//! waits for the process. Both post into a single queue that
//! [`Supervisor::next_event`] drains, so all worker state changes happen on
//! the caller's task.
//!
//! The process exit is the only source of [`SupervisorEvent::Terminated`]. A
//! lost connection marks the worker terminated right away (pushes fail, pending
//! events are dropped) and gives the process a grace period to exit before it
//! is killed.

use crate::correlation::{Correlator, PendingEvent};
use crate::endpoint::{self, ConnectionError, FrameError, FrameReader, FrameWriter};
use crate::launch::PluginInstance;
use crate::lifecycle::{WorkerExit, WorkerState};
use crate::protocol::{Message, Property, ProviderSignal, Value};
use bladebar_core::{AppDirs, Config, BUS_DIR_ENV, LOG_ENV};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// File name of the wrapper binary next to the panel executable.
pub const WRAPPER_BINARY: &str = "bladebar-wrapper";

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("plugin {0} is already running")]
    AlreadyRunning(u32),
    #[error(transparent)]
    Endpoint(#[from] ConnectionError),
    #[error("failed to spawn wrapper for plugin {name} ({unique_id}): {source}")]
    Spawn {
        name: String,
        unique_id: u32,
        source: io::Error,
    },
    #[error("plugin {0} is not connected")]
    NotConnected(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub wrapper_binary: PathBuf,
    pub bus_dir: PathBuf,
    /// How long a disconnected worker may take to exit before it is killed.
    pub exit_grace: Duration,
    /// Log filter passed to wrappers through the environment.
    pub log_filter: Option<String>,
}

impl SupervisorConfig {
    pub fn from_config(config: &Config, dirs: &AppDirs) -> Self {
        let wrapper_binary = config
            .wrapper
            .binary
            .clone()
            .unwrap_or_else(default_wrapper_binary);
        Self {
            wrapper_binary,
            bus_dir: config.bus_dir(dirs),
            exit_grace: Duration::from_millis(config.wrapper.exit_grace_ms),
            log_filter: Some(config.logging.level.as_filter_directive().to_string()),
        }
    }
}

fn default_wrapper_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WRAPPER_BINARY)))
        .unwrap_or_else(|| PathBuf::from(WRAPPER_BINARY))
}

/// Identifies a supervised plugin instance; wraps its unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerHandle(pub u32);

impl WorkerHandle {
    pub fn unique_id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin-{}", self.0)
    }
}

/// Events surfaced to the panel.
#[derive(Debug, PartialEq)]
pub enum SupervisorEvent {
    /// The wrapper connected to its endpoint.
    Connected { handle: WorkerHandle },
    ProviderSignal {
        handle: WorkerHandle,
        signal: ProviderSignal,
    },
    /// The plugin raised a remote event; answer with [`Supervisor::reply_remote_event`].
    RemoteEvent {
        handle: WorkerHandle,
        name: String,
        payload: Option<Value>,
        event_handle: u32,
    },
    /// The wrapper process is gone. Emitted exactly once per spawn.
    Terminated {
        handle: WorkerHandle,
        instance: PluginInstance,
        exit: WorkerExit,
    },
}

/// Supervisor record of one running wrapper.
#[derive(Debug)]
pub struct Worker {
    instance: PluginInstance,
    serial: u64,
    state: WorkerState,
    frames: mpsc::UnboundedSender<Message>,
    kill: mpsc::UnboundedSender<Duration>,
    socket_path: PathBuf,
    pid: Option<u32>,
    show_configure: bool,
    show_about: bool,
    accepted: bool,
    disconnected: bool,
    /// Exit held back until the connection has delivered its last frames.
    held_exit: Option<WorkerExit>,
    tasks: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn instance(&self) -> &PluginInstance {
        &self.instance
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The plugin announced a configuration dialog.
    pub fn show_configure(&self) -> bool {
        self.show_configure
    }

    /// The plugin announced an about dialog.
    pub fn show_about(&self) -> bool {
        self.show_about
    }

    fn is_live(&self) -> bool {
        self.state != WorkerState::Terminated
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[derive(Debug)]
struct Envelope {
    unique_id: u32,
    serial: u64,
    event: Internal,
}

#[derive(Debug)]
enum Internal {
    Connected,
    Frame(Message),
    Disconnected,
    Exited(WorkerExit),
}

pub struct Supervisor {
    config: SupervisorConfig,
    workers: HashMap<u32, Worker>,
    correlator: Correlator,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    next_serial: u64,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            workers: HashMap::new(),
            correlator: Correlator::new(),
            events_tx,
            events_rx,
            next_serial: 0,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch a wrapper for `instance` without a host window.
    pub fn spawn(&mut self, instance: PluginInstance) -> Result<WorkerHandle, SupervisorError> {
        self.spawn_embedded(instance, 0)
    }

    /// Register the instance's endpoint and launch its wrapper, telling it to
    /// embed into `socket_id`.
    pub fn spawn_embedded(
        &mut self,
        instance: PluginInstance,
        socket_id: u64,
    ) -> Result<WorkerHandle, SupervisorError> {
        let unique_id = instance.unique_id;
        if self.workers.contains_key(&unique_id) {
            return Err(SupervisorError::AlreadyRunning(unique_id));
        }

        let (listener, socket_path) = endpoint::register(&self.config.bus_dir, instance.endpoint())?;

        let mut command = Command::new(&self.config.wrapper_binary);
        command
            .arg0(PluginInstance::argv0(&self.config.wrapper_binary))
            .args(instance.launch_args(socket_id))
            .env(BUS_DIR_ENV, &self.config.bus_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(filter) = &self.config.log_filter {
            command.env(LOG_ENV, filter);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let _ = std::fs::remove_file(&socket_path);
                return Err(SupervisorError::Spawn {
                    name: instance.name.clone(),
                    unique_id,
                    source,
                });
            }
        };
        let pid = child.id();

        self.next_serial += 1;
        let serial = self.next_serial;
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(connection_loop(
                listener,
                frames_rx,
                self.events_tx.clone(),
                unique_id,
                serial,
            )),
            tokio::spawn(wait_loop(
                child,
                kill_rx,
                self.events_tx.clone(),
                unique_id,
                serial,
            )),
        ];

        tracing::info!(
            unique_id,
            name = %instance.name,
            pid = ?pid,
            module = %instance.module_path.display(),
            "spawned plugin wrapper"
        );

        self.workers.insert(
            unique_id,
            Worker {
                instance,
                serial,
                state: WorkerState::Spawned,
                frames: frames_tx,
                kill: kill_tx,
                socket_path,
                pid,
                show_configure: false,
                show_about: false,
                accepted: false,
                disconnected: false,
                held_exit: None,
                tasks,
            },
        );
        Ok(WorkerHandle(unique_id))
    }

    /// Queue an ordered property batch. Batches pushed before the wrapper
    /// connects are delivered once it does.
    pub fn push_properties(
        &mut self,
        handle: WorkerHandle,
        properties: Vec<Property>,
    ) -> Result<(), SupervisorError> {
        let worker = self.live_worker_mut(handle)?;
        if properties.is_empty() {
            return Ok(());
        }
        if worker.state == WorkerState::Connected {
            worker.state = WorkerState::Active;
        }
        worker
            .frames
            .send(Message::Set(properties))
            .map_err(|_| SupervisorError::NotConnected(handle.0))
    }

    /// Send a named event to the plugin. The token resolves with the plugin's
    /// answer, or to `None` if the worker goes away first.
    pub fn send_remote_event(
        &mut self,
        handle: WorkerHandle,
        name: &str,
        payload: Option<Value>,
    ) -> Result<PendingEvent, SupervisorError> {
        let frames = self.live_worker_mut(handle)?.frames.clone();
        let (event_handle, pending) = self.correlator.issue(handle.0);
        if frames
            .send(Message::remote_event(name, payload, event_handle))
            .is_err()
        {
            self.correlator.cancel(event_handle);
            return Err(SupervisorError::NotConnected(handle.0));
        }
        tracing::debug!(unique_id = handle.0, name, event_handle, "sent remote event");
        Ok(pending)
    }

    /// Answer a remote event the plugin raised.
    pub fn reply_remote_event(
        &mut self,
        handle: WorkerHandle,
        event_handle: u32,
        result: bool,
    ) -> Result<(), SupervisorError> {
        self.live_worker_mut(handle)?
            .frames
            .send(Message::RemoteEventResult {
                handle: event_handle,
                result,
            })
            .map_err(|_| SupervisorError::NotConnected(handle.0))
    }

    /// Kill the wrapper process now. The worker stops taking pushes and its
    /// pending events are dropped at once; its exit still arrives as `Terminated`.
    pub fn kill(&mut self, handle: WorkerHandle) -> Result<(), SupervisorError> {
        let worker = self
            .workers
            .get_mut(&handle.0)
            .ok_or(SupervisorError::NotConnected(handle.0))?;
        worker.state = WorkerState::Terminated;
        worker
            .kill
            .send(Duration::ZERO)
            .map_err(|_| SupervisorError::NotConnected(handle.0))?;
        let evicted = self.correlator.evict(handle.0);
        tracing::info!(%handle, evicted, "killing plugin wrapper");
        Ok(())
    }

    /// Ask every live plugin to quit. Returns how many were asked.
    pub fn shutdown(&mut self) -> usize {
        let mut asked = 0;
        for handle in self.live_handles() {
            match self.push_properties(handle, vec![Property::Quit]) {
                Ok(()) => asked += 1,
                Err(err) => tracing::debug!(%handle, error = %err, "skipping quit"),
            }
        }
        asked
    }

    /// Wait for the next worker event. `None` once no workers are left.
    ///
    /// Cancel safe: dropping the future loses nothing.
    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        loop {
            if self.workers.is_empty() {
                return None;
            }
            let envelope = self.events_rx.recv().await?;
            if let Some(event) = self.dispatch(envelope) {
                return Some(event);
            }
        }
    }

    pub fn worker(&self, handle: WorkerHandle) -> Option<&Worker> {
        self.workers.get(&handle.0)
    }

    pub fn is_live(&self, handle: WorkerHandle) -> bool {
        self.workers.get(&handle.0).is_some_and(Worker::is_live)
    }

    pub fn live_handles(&self) -> Vec<WorkerHandle> {
        let mut handles: Vec<_> = self
            .workers
            .iter()
            .filter(|(_, worker)| worker.is_live())
            .map(|(id, _)| WorkerHandle(*id))
            .collect();
        handles.sort();
        handles
    }

    /// Remote events sent to plugins that are still waiting for a result.
    pub fn pending_events(&self) -> usize {
        self.correlator.pending_count()
    }

    fn live_worker_mut(&mut self, handle: WorkerHandle) -> Result<&mut Worker, SupervisorError> {
        self.workers
            .get_mut(&handle.0)
            .filter(|worker| worker.is_live())
            .ok_or(SupervisorError::NotConnected(handle.0))
    }

    fn dispatch(&mut self, envelope: Envelope) -> Option<SupervisorEvent> {
        let Envelope {
            unique_id,
            serial,
            event,
        } = envelope;
        let handle = WorkerHandle(unique_id);

        match self.workers.get(&unique_id) {
            Some(worker) if worker.serial == serial => {}
            _ => {
                tracing::trace!(unique_id, serial, ?event, "ignoring event from an old worker");
                return None;
            }
        }

        match event {
            Internal::Connected => {
                if let Some(worker) = self.workers.get_mut(&unique_id) {
                    worker.accepted = true;
                    if worker.state == WorkerState::Spawned {
                        worker.state = WorkerState::Connected;
                    }
                }
                tracing::debug!(unique_id, "wrapper connected");
                Some(SupervisorEvent::Connected { handle })
            }
            Internal::Frame(message) => self.on_frame(handle, message),
            Internal::Disconnected => {
                self.on_disconnected(handle);
                let held = self
                    .workers
                    .get_mut(&unique_id)
                    .and_then(|worker| worker.held_exit.take());
                held.and_then(|exit| self.on_worker_terminated(handle, exit))
            }
            Internal::Exited(exit) => self.on_exited(handle, exit),
        }
    }

    fn on_frame(&mut self, handle: WorkerHandle, message: Message) -> Option<SupervisorEvent> {
        if let Some(worker) = self.workers.get_mut(&handle.0) {
            if worker.state == WorkerState::Connected {
                worker.state = WorkerState::Active;
            }
        }

        match message {
            Message::RemoteEventResult {
                handle: event_handle,
                result,
            } => {
                self.on_remote_event_result(handle, event_handle, result);
                None
            }
            Message::ProviderSignal { signal } => self.on_provider_signal(handle, signal),
            Message::RemoteEvent {
                name,
                value,
                handle: event_handle,
            } => Some(SupervisorEvent::RemoteEvent {
                handle,
                name,
                payload: value.into_payload(),
                event_handle,
            }),
            Message::Set(_) => {
                tracing::warn!(%handle, "wrapper sent a property batch; dropping it");
                None
            }
        }
    }

    fn on_remote_event_result(&mut self, handle: WorkerHandle, event_handle: u32, result: bool) {
        if self.correlator.resolve(handle.0, event_handle, result) {
            tracing::debug!(%handle, event_handle, result, "remote event answered");
        } else {
            tracing::debug!(%handle, event_handle, "ignoring result for unknown remote event");
        }
    }

    fn on_provider_signal(
        &mut self,
        handle: WorkerHandle,
        signal: ProviderSignal,
    ) -> Option<SupervisorEvent> {
        let worker = self.workers.get_mut(&handle.0)?;
        match signal {
            ProviderSignal::ShowConfigure => worker.show_configure = true,
            ProviderSignal::ShowAbout => worker.show_about = true,
            _ => {
                tracing::debug!(%handle, ?signal, "provider signal");
                return Some(SupervisorEvent::ProviderSignal { handle, signal });
            }
        }
        tracing::debug!(%handle, ?signal, "plugin announced a dialog");
        None
    }

    fn on_disconnected(&mut self, handle: WorkerHandle) {
        let grace = self.config.exit_grace;
        let Some(worker) = self.workers.get_mut(&handle.0) else {
            return;
        };
        worker.disconnected = true;
        if !worker.is_live() {
            return;
        }
        worker.state = WorkerState::Terminated;
        let _ = worker.kill.send(grace);
        let evicted = self.correlator.evict(handle.0);
        tracing::info!(%handle, evicted, "wrapper disconnected, waiting for exit");
    }

    /// The process is gone. While its connection is still open the exit is
    /// held so frames it wrote before exiting are dispatched first; the
    /// socket closes with the process, which releases it.
    fn on_exited(&mut self, handle: WorkerHandle, exit: WorkerExit) -> Option<SupervisorEvent> {
        let worker = self.workers.get_mut(&handle.0)?;
        if worker.accepted && !worker.disconnected {
            tracing::trace!(%handle, %exit, "wrapper exited, draining its connection");
            worker.held_exit.get_or_insert(exit);
            return None;
        }
        self.on_worker_terminated(handle, exit)
    }

    fn on_worker_terminated(
        &mut self,
        handle: WorkerHandle,
        exit: WorkerExit,
    ) -> Option<SupervisorEvent> {
        let worker = self.workers.remove(&handle.0)?;
        let evicted = self.correlator.evict(handle.0);
        if exit.is_clean() {
            tracing::info!(%handle, name = %worker.instance.name, %exit, "plugin wrapper exited");
        } else {
            tracing::warn!(%handle, name = %worker.instance.name, %exit, evicted, "plugin wrapper terminated");
        }
        Some(SupervisorEvent::Terminated {
            handle,
            instance: worker.instance.clone(),
            exit,
        })
    }

    #[cfg(test)]
    fn insert_detached(
        &mut self,
        instance: PluginInstance,
    ) -> (
        WorkerHandle,
        u64,
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedReceiver<Duration>,
    ) {
        let unique_id = instance.unique_id;
        self.next_serial += 1;
        let serial = self.next_serial;
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (kill, kill_rx) = mpsc::unbounded_channel();
        self.workers.insert(
            unique_id,
            Worker {
                instance,
                serial,
                state: WorkerState::Spawned,
                frames,
                kill,
                socket_path: PathBuf::new(),
                pid: None,
                show_configure: false,
                show_about: false,
                accepted: false,
                disconnected: false,
                held_exit: None,
                tasks: Vec::new(),
            },
        );
        (WorkerHandle(unique_id), serial, frames_rx, kill_rx)
    }
}

async fn connection_loop(
    listener: UnixListener,
    mut frames: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<Envelope>,
    unique_id: u32,
    serial: u64,
) {
    let post = |event: Internal| {
        let _ = events.send(Envelope {
            unique_id,
            serial,
            event,
        });
    };

    let stream = match listener.accept().await {
        Ok((stream, _)) => stream,
        Err(err) => {
            tracing::warn!(unique_id, error = %err, "failed to accept wrapper connection");
            post(Internal::Disconnected);
            return;
        }
    };
    drop(listener);
    post(Internal::Connected);

    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    loop {
        tokio::select! {
            incoming = reader.read() => match incoming {
                Ok(Some(message)) => post(Internal::Frame(message)),
                Ok(None) => break,
                Err(FrameError::Codec(err)) => {
                    tracing::warn!(unique_id, error = %err, "dropping malformed frame");
                }
                Err(FrameError::Io(err)) => {
                    tracing::warn!(unique_id, error = %err, "wrapper connection failed");
                    break;
                }
            },
            outgoing = frames.recv() => match outgoing {
                Some(message) => {
                    if let Err(err) = writer.send(&message).await {
                        tracing::warn!(unique_id, error = %err, "failed to write frame");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    post(Internal::Disconnected);
}

async fn wait_loop(
    mut child: Child,
    mut kill: mpsc::UnboundedReceiver<Duration>,
    events: mpsc::UnboundedSender<Envelope>,
    unique_id: u32,
    serial: u64,
) {
    let mut deadline: Option<Instant> = None;
    let mut kill_open = true;

    let exit = loop {
        tokio::select! {
            status = child.wait() => break match status {
                Ok(status) => WorkerExit::from_status(status),
                Err(err) => {
                    tracing::warn!(unique_id, error = %err, "failed to collect wrapper exit status");
                    WorkerExit::Lost
                }
            },
            grace = kill.recv(), if kill_open => match grace {
                Some(grace) => {
                    let at = Instant::now() + grace;
                    deadline = Some(deadline.map_or(at, |current| current.min(at)));
                }
                None => kill_open = false,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                tracing::warn!(unique_id, "killing plugin wrapper");
                if let Err(err) = child.start_kill() {
                    tracing::warn!(unique_id, error = %err, "failed to kill plugin wrapper");
                }
                deadline = None;
            }
        }
    };

    let _ = events.send(Envelope {
        unique_id,
        serial,
        event: Internal::Exited(exit),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::WrapperExit;
    use std::path::Path;

    fn instance(unique_id: u32) -> PluginInstance {
        PluginInstance {
            unique_id,
            module_path: PathBuf::from("libclock.so"),
            name: "clock".into(),
            display_name: "Clock".into(),
            comment: String::new(),
            arguments: vec![],
        }
    }

    fn supervisor(bus_dir: &Path) -> Supervisor {
        Supervisor::new(SupervisorConfig {
            wrapper_binary: PathBuf::from("/nonexistent/bladebar-wrapper"),
            bus_dir: bus_dir.to_path_buf(),
            exit_grace: Duration::from_millis(50),
            log_filter: None,
        })
    }

    fn post(supervisor: &Supervisor, unique_id: u32, serial: u64, event: Internal) {
        supervisor
            .events_tx
            .send(Envelope {
                unique_id,
                serial,
                event,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn next_event_is_none_without_workers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        assert_eq!(supervisor.next_event().await, None);
    }

    #[tokio::test]
    async fn failed_spawn_cleans_up_endpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let err = supervisor.spawn(instance(3)).unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { unique_id: 3, .. }));
        assert!(!instance(3).endpoint().socket_path(tmp.path()).exists());
        assert!(!supervisor.is_live(WorkerHandle(3)));
    }

    #[tokio::test]
    async fn pushes_are_queued_in_order_and_activate_the_worker() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, mut frames, _kill) = supervisor.insert_detached(instance(7));

        supervisor
            .push_properties(handle, vec![Property::Size(30), Property::Mode(0)])
            .unwrap();
        post(&supervisor, 7, serial, Internal::Connected);
        assert_eq!(
            supervisor.next_event().await,
            Some(SupervisorEvent::Connected { handle })
        );
        assert_eq!(supervisor.worker(handle).unwrap().state(), WorkerState::Connected);

        supervisor
            .push_properties(handle, vec![Property::Locked(true)])
            .unwrap();
        assert_eq!(supervisor.worker(handle).unwrap().state(), WorkerState::Active);

        assert_eq!(
            frames.try_recv().unwrap(),
            Message::Set(vec![Property::Size(30), Property::Mode(0)])
        );
        assert_eq!(
            frames.try_recv().unwrap(),
            Message::Set(vec![Property::Locked(true)])
        );
    }

    #[tokio::test]
    async fn dialog_signals_set_flags_and_others_surface() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, _frames, _kill) = supervisor.insert_detached(instance(7));

        for signal in [
            ProviderSignal::ShowConfigure,
            ProviderSignal::ShowAbout,
            ProviderSignal::ExpandPlugin,
        ] {
            post(&supervisor, 7, serial, Internal::Frame(Message::ProviderSignal { signal }));
        }
        assert_eq!(
            supervisor.next_event().await,
            Some(SupervisorEvent::ProviderSignal {
                handle,
                signal: ProviderSignal::ExpandPlugin
            })
        );
        let worker = supervisor.worker(handle).unwrap();
        assert!(worker.show_configure());
        assert!(worker.show_about());
    }

    #[tokio::test]
    async fn remote_event_results_resolve_pending_events() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, mut frames, _kill) = supervisor.insert_detached(instance(7));
        let (_other, other_serial, _, _) = supervisor.insert_detached(instance(8));

        let pending = supervisor
            .send_remote_event(handle, "refresh", None)
            .unwrap();
        let event_handle = pending.handle();
        assert_eq!(
            frames.try_recv().unwrap(),
            Message::remote_event("refresh", None, event_handle)
        );

        // a result from a different plugin is not accepted
        post(
            &supervisor,
            8,
            other_serial,
            Internal::Frame(Message::RemoteEventResult {
                handle: event_handle,
                result: false,
            }),
        );
        post(
            &supervisor,
            7,
            serial,
            Internal::Frame(Message::RemoteEventResult {
                handle: event_handle,
                result: true,
            }),
        );
        post(&supervisor, 7, serial, Internal::Exited(WorkerExit::Exited(WrapperExit::Success)));
        assert!(matches!(
            supervisor.next_event().await,
            Some(SupervisorEvent::Terminated { .. })
        ));
        assert_eq!(pending.wait().await, Some(true));
        assert_eq!(supervisor.pending_events(), 0);
    }

    #[tokio::test]
    async fn worker_remote_events_surface_with_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, mut frames, _kill) = supervisor.insert_detached(instance(7));

        post(
            &supervisor,
            7,
            serial,
            Internal::Frame(Message::remote_event("separator:set-style", Some(Value::String("dots".into())), 4)),
        );
        assert_eq!(
            supervisor.next_event().await,
            Some(SupervisorEvent::RemoteEvent {
                handle,
                name: "separator:set-style".into(),
                payload: Some(Value::String("dots".into())),
                event_handle: 4,
            })
        );

        supervisor.reply_remote_event(handle, 4, true).unwrap();
        assert_eq!(
            frames.try_recv().unwrap(),
            Message::RemoteEventResult {
                handle: 4,
                result: true
            }
        );
    }

    #[tokio::test]
    async fn disconnect_terminates_then_exit_reports_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, _frames, mut kill) = supervisor.insert_detached(instance(7));
        let _keep = supervisor.insert_detached(instance(9));

        let pending = supervisor.send_remote_event(handle, "refresh", None).unwrap();

        post(&supervisor, 7, serial, Internal::Disconnected);
        post(&supervisor, 7, serial, Internal::Disconnected);
        post(&supervisor, 7, serial, Internal::Exited(WorkerExit::Signaled(Some(9))));
        post(&supervisor, 7, serial, Internal::Exited(WorkerExit::Lost));

        let event = supervisor.next_event().await;
        let Some(SupervisorEvent::Terminated {
            handle: terminated,
            instance: gone,
            exit,
        }) = event
        else {
            panic!("expected termination, got {event:?}");
        };
        assert_eq!(terminated, handle);
        assert_eq!(gone, instance(7));
        assert_eq!(exit, WorkerExit::Signaled(Some(9)));

        // disconnect asked for the grace period exactly once
        assert_eq!(kill.try_recv().unwrap(), Duration::from_millis(50));
        assert!(kill.try_recv().is_err());

        assert_eq!(pending.wait().await, None);
        assert!(!supervisor.is_live(handle));
        assert!(matches!(
            supervisor.push_properties(handle, vec![Property::Size(1)]),
            Err(SupervisorError::NotConnected(7))
        ));
        assert_eq!(supervisor.live_handles(), vec![WorkerHandle(9)]);
    }

    #[tokio::test]
    async fn exit_waits_for_frames_written_before_it() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, _frames, _kill) = supervisor.insert_detached(instance(7));

        let pending = supervisor.send_remote_event(handle, "refresh", None).unwrap();
        let event_handle = pending.handle();

        post(&supervisor, 7, serial, Internal::Connected);
        post(&supervisor, 7, serial, Internal::Exited(WorkerExit::Exited(WrapperExit::Success)));
        post(
            &supervisor,
            7,
            serial,
            Internal::Frame(Message::ProviderSignal {
                signal: ProviderSignal::RemovePlugin,
            }),
        );
        post(
            &supervisor,
            7,
            serial,
            Internal::Frame(Message::RemoteEventResult {
                handle: event_handle,
                result: true,
            }),
        );
        post(&supervisor, 7, serial, Internal::Disconnected);

        assert_eq!(
            supervisor.next_event().await,
            Some(SupervisorEvent::Connected { handle })
        );
        assert_eq!(
            supervisor.next_event().await,
            Some(SupervisorEvent::ProviderSignal {
                handle,
                signal: ProviderSignal::RemovePlugin
            })
        );
        assert_eq!(
            supervisor.next_event().await,
            Some(SupervisorEvent::Terminated {
                handle,
                instance: instance(7),
                exit: WorkerExit::Exited(WrapperExit::Success),
            })
        );
        assert_eq!(pending.wait().await, Some(true));
        assert_eq!(supervisor.next_event().await, None);
    }

    #[tokio::test]
    async fn kill_drops_pending_events_at_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, _frames, mut kill) = supervisor.insert_detached(instance(7));

        let pending = supervisor.send_remote_event(handle, "refresh", None).unwrap();
        let event_handle = pending.handle();
        supervisor.kill(handle).unwrap();

        assert_eq!(kill.try_recv().unwrap(), Duration::ZERO);
        assert!(!supervisor.is_live(handle));
        assert_eq!(supervisor.pending_events(), 0);
        assert!(matches!(
            supervisor.push_properties(handle, vec![Property::Size(1)]),
            Err(SupervisorError::NotConnected(7))
        ));

        // an answer that was already on its way no longer counts
        post(
            &supervisor,
            7,
            serial,
            Internal::Frame(Message::RemoteEventResult {
                handle: event_handle,
                result: true,
            }),
        );
        post(&supervisor, 7, serial, Internal::Exited(WorkerExit::Signaled(Some(9))));
        assert!(matches!(
            supervisor.next_event().await,
            Some(SupervisorEvent::Terminated { .. })
        ));
        assert_eq!(pending.wait().await, None);
    }

    #[tokio::test]
    async fn terminated_worker_rejects_pushes_before_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (handle, serial, _frames, _kill) = supervisor.insert_detached(instance(7));
        let _keep = supervisor.insert_detached(instance(9));

        post(&supervisor, 7, serial, Internal::Disconnected);
        post(&supervisor, 9, 0, Internal::Connected);
        // drains the disconnect; the stale connect is dropped too
        let next = tokio::time::timeout(Duration::from_millis(50), supervisor.next_event()).await;
        assert!(next.is_err());

        assert_eq!(
            supervisor.worker(handle).unwrap().state(),
            WorkerState::Terminated
        );
        assert!(supervisor.push_properties(handle, vec![Property::Quit]).is_err());
        assert!(supervisor.send_remote_event(handle, "x", None).is_err());
        assert!(supervisor.kill(handle).is_ok());
    }

    #[tokio::test]
    async fn shutdown_asks_every_live_worker_to_quit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let (_, _, mut first, _k1) = supervisor.insert_detached(instance(1));
        let (_, _, mut second, _k2) = supervisor.insert_detached(instance(2));

        assert_eq!(supervisor.shutdown(), 2);
        assert_eq!(first.try_recv().unwrap(), Message::Set(vec![Property::Quit]));
        assert_eq!(second.try_recv().unwrap(), Message::Set(vec![Property::Quit]));
    }

    #[tokio::test]
    async fn duplicate_spawn_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut supervisor = supervisor(tmp.path());
        let _ = supervisor.insert_detached(instance(7));
        assert!(matches!(
            supervisor.spawn(instance(7)),
            Err(SupervisorError::AlreadyRunning(7))
        ));
    }
}
