use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use service_lifecycle::{
    CapabilitySet, Service, ServiceEvent, ServiceState, Startable, StateMachine, Suspendable,
    create_state_machine,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::TailConfig;
use crate::error::{Result, TailError};
use crate::follow::Follower;
use crate::listener::{Fanout, TailEvent, TailInfo, TailListener};
use crate::source::{Input, SourceSlot, StreamReader, TailSource};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle state shared with the follow thread.
pub(crate) struct Control {
    pub(crate) machine: StateMachine,
    pub(crate) pending_shutdown: bool,
    /// Bumped on every start so a follow thread that outlived its join
    /// timeout knows it has been replaced.
    pub(crate) generation: u64,
}

pub(crate) struct Shared {
    pub(crate) control: Mutex<Control>,
    /// Signalled on every lifecycle change.
    pub(crate) wake: Condvar,
    pub(crate) fanout: Fanout,
}

struct Worker {
    handle: JoinHandle<()>,
    exit: Receiver<Option<StreamReader>>,
}

/// Follows a file or stream on a dedicated thread and reports each new line
/// to its listeners.
///
/// A tail starts out stopped. [`start`](Tail::start) replays the backlog and
/// begins following; [`suspend`](Tail::suspend) and [`resume`](Tail::resume)
/// pause delivery without losing position; [`stop`](Tail::stop) ends the
/// follow thread. A stopped tail can be started again. File sources are
/// reopened (and their backlog replayed) on each start; a stream is picked up
/// where the previous run left it.
///
/// Lifecycle calls are meant to come from a single owner thread. Each call
/// that is not legal from the current state fails with
/// [`TailError::Lifecycle`] and changes nothing.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use live_tail::{Tail, TailInfo, TailListener, TailSource};
///
/// struct Print;
///
/// impl TailListener for Print {
///     fn next_line(&self, _tail: &TailInfo, line: &str) -> anyhow::Result<()> {
///         println!("{line}");
///         Ok(())
///     }
/// }
///
/// let tail = Tail::follow(TailSource::file("/var/log/syslog"), None)?;
/// tail.set_backlog(10);
/// tail.add_tail_listener(Arc::new(Print));
/// tail.start()?;
/// // ...
/// tail.stop()?;
/// # Ok::<(), live_tail::TailError>(())
/// ```
pub struct Tail {
    shared: Arc<Shared>,
    source: Mutex<SourceSlot>,
    config: Mutex<TailConfig>,
    worker: Mutex<Option<Worker>>,
}

impl Tail {
    pub const CAPABILITIES: CapabilitySet =
        CapabilitySet::STARTABLE.union(CapabilitySet::SUSPENDABLE);

    /// Follow `source` with the default configuration, copying every line to
    /// `sink` if one is given.
    pub fn follow(source: TailSource, sink: Option<Box<dyn Write + Send>>) -> Result<Self> {
        let tail = Self::with_config(source, TailConfig::default())?;
        if let Some(sink) = sink {
            tail.add_sink(sink);
        }
        Ok(tail)
    }

    pub fn with_config(source: TailSource, config: TailConfig) -> Result<Self> {
        config.validate()?;
        let machine = create_state_machine(Self::CAPABILITIES)?;
        let info = TailInfo {
            name: config
                .thread_name
                .clone()
                .unwrap_or_else(|| source.thread_name()),
            source: source.describe(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    machine,
                    pending_shutdown: false,
                    generation: 0,
                }),
                wake: Condvar::new(),
                fanout: Fanout::new(info),
            }),
            source: Mutex::new(source.into()),
            config: Mutex::new(config),
            worker: Mutex::new(None),
        })
    }

    pub fn info(&self) -> &TailInfo {
        self.shared.fanout.info()
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn is_file(&self) -> bool {
        matches!(*lock(&self.source), SourceSlot::File(_))
    }

    /// Takes effect on the next start.
    pub fn set_backlog(&self, lines: usize) {
        lock(&self.config).backlog = lines;
    }

    pub fn backlog(&self) -> usize {
        lock(&self.config).backlog
    }

    pub fn config(&self) -> TailConfig {
        lock(&self.config).clone()
    }

    /// Returns false if this listener was already registered.
    pub fn add_tail_listener(&self, listener: Arc<dyn TailListener>) -> bool {
        self.shared.fanout.listeners().add(listener)
    }

    pub fn remove_tail_listener(&self, listener: &Arc<dyn TailListener>) -> bool {
        self.shared.fanout.listeners().remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.fanout.listeners().len()
    }

    /// Every delivered line is also written to `sink`, newline-terminated.
    pub fn add_sink(&self, sink: Box<dyn Write + Send>) {
        self.shared.fanout.add_sink(sink);
    }

    /// Receive every event as a [`TailEvent`]. Subscribers that fall too far
    /// behind lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<TailEvent> {
        self.shared.fanout.subscribe()
    }

    pub fn state(&self) -> ServiceState {
        lock(&self.shared.control)
            .machine
            .state()
            .unwrap_or(ServiceState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == ServiceState::Suspended
    }

    /// Open the source and begin following it on a new thread.
    ///
    /// Fails without side effects if the tail is not stopped or the source
    /// cannot be opened.
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        lock(&self.shared.control)
            .machine
            .ensure_transition(ServiceEvent::Start)?;

        let config = self.config();
        let input = self.open_input()?;

        let generation = {
            let mut control = lock(&self.shared.control);
            control.pending_shutdown = false;
            control.generation += 1;
            control.generation
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let (exit_tx, exit_rx) = mpsc::sync_channel(1);
        let follower = Follower::new(self.shared.clone(), input, generation, &config);
        let handle = thread::Builder::new()
            .name(self.name().to_string())
            .spawn(move || follower.run(ready_rx, exit_tx))
            .map_err(TailError::Spawn)?;

        lock(&self.shared.control)
            .machine
            .transition(ServiceEvent::Start)?;
        *worker = Some(Worker {
            handle,
            exit: exit_rx,
        });
        drop(worker);

        info!(
            tail = %self.name(),
            source = %self.info().source,
            backlog = config.backlog,
            "Tail started"
        );
        self.shared.fanout.fire(TailEvent::Started);
        // Only now may the follow thread deliver lines.
        let _ = ready_tx.send(());
        Ok(())
    }

    /// Shut the follow thread down and wait for it, up to the configured
    /// join timeout. A suspended tail is resumed first.
    ///
    /// The source is not closed here: a stream is kept for the next start,
    /// and a file is simply reopened.
    ///
    /// If the thread does not exit within the timeout (a stream stuck in a
    /// blocking read, say), it is detached and keeps the stream. The tail
    /// still stops, but later starts of a stream source then fail with
    /// [`TailError::StreamUnavailable`]. File sources are unaffected.
    pub fn stop(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        {
            let mut control = lock(&self.shared.control);
            let suspended = control.machine.state() == Some(ServiceState::Suspended);
            if suspended {
                control.machine.ensure_transition(ServiceEvent::Resume)?;
            } else {
                control.machine.ensure_transition(ServiceEvent::Stop)?;
            }
            control.pending_shutdown = true;
            if suspended {
                control.machine.transition(ServiceEvent::Resume)?;
            }
        }
        self.shared.wake.notify_all();

        if let Some(running) = worker.take() {
            let timeout = self.config().join_timeout();
            self.join(running, timeout);
        }

        lock(&self.shared.control)
            .machine
            .transition(ServiceEvent::Stop)?;
        drop(worker);

        info!(tail = %self.name(), "Tail stopped");
        self.shared.fanout.fire(TailEvent::Stopped);
        Ok(())
    }

    /// Pause delivery. The follow thread keeps its position.
    pub fn suspend(&self) -> Result<()> {
        lock(&self.shared.control)
            .machine
            .transition(ServiceEvent::Suspend)?;
        self.shared.wake.notify_all();
        debug!(tail = %self.name(), "Tail suspended");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        lock(&self.shared.control)
            .machine
            .transition(ServiceEvent::Resume)?;
        self.shared.wake.notify_all();
        debug!(tail = %self.name(), "Tail resumed");
        Ok(())
    }

    fn open_input(&self) -> Result<Input> {
        let mut source = lock(&self.source);
        match &mut *source {
            SourceSlot::File(path) => {
                Input::open_file(path).map_err(|source| TailError::SourceUnavailable {
                    path: path.clone(),
                    source,
                })
            }
            SourceSlot::Stream(stream) => stream
                .take()
                .map(Input::Stream)
                .ok_or(TailError::StreamUnavailable),
        }
    }

    fn join(&self, worker: Worker, timeout: Duration) {
        match worker.exit.recv_timeout(timeout) {
            Ok(stream) => {
                if let Some(stream) = stream {
                    if let SourceSlot::Stream(slot) = &mut *lock(&self.source) {
                        *slot = Some(stream);
                    }
                }
                if worker.handle.join().is_err() {
                    error!(tail = %self.name(), "Follow thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    tail = %self.name(),
                    "Follow thread did not exit within {:?}, detaching it",
                    timeout
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                error!(tail = %self.name(), "Follow thread died without returning its source");
            }
        }
    }
}

impl Drop for Tail {
    fn drop(&mut self) {
        if self.state() != ServiceState::Stopped {
            if let Err(e) = self.stop() {
                warn!(tail = %self.name(), "Failed to stop tail on drop: {}", e);
            }
        }
    }
}

impl Service for Tail {
    fn capabilities(&self) -> CapabilitySet {
        Self::CAPABILITIES
    }

    fn state(&self) -> ServiceState {
        Tail::state(self)
    }
}

impl Startable for Tail {
    type Error = TailError;

    fn start(&self) -> Result<()> {
        Tail::start(self)
    }

    fn stop(&self) -> Result<()> {
        Tail::stop(self)
    }

    fn is_running(&self) -> bool {
        Tail::is_running(self)
    }
}

impl Suspendable for Tail {
    fn suspend(&self) -> Result<()> {
        Tail::suspend(self)
    }

    fn resume(&self) -> Result<()> {
        Tail::resume(self)
    }

    fn is_suspended(&self) -> bool {
        Tail::is_suspended(self)
    }
}
