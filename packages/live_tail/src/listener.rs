//! Listener registration and event fan-out.
//!
//! Every event goes to the registered listeners in registration order, then
//! to the sinks (lines only) and to broadcast subscribers. A listener that
//! errors or panics is logged and skipped; it never reaches the follow loop.

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Identifies the tail an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailInfo {
    /// Follow thread name.
    pub name: String,
    /// Human-readable description of the source.
    pub source: String,
}

/// Everything a tail reports, as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    Line(String),
    Started,
    Stopped,
    Paused,
    Unpaused,
    /// The file was truncated or rewritten and has been reopened from the top.
    Reattached,
}

impl TailEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Line(_) => "line",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Unpaused => "unpaused",
            Self::Reattached => "reattached",
        }
    }
}

/// Observer of a [`Tail`](crate::Tail). Every callback defaults to doing nothing.
pub trait TailListener: Send + Sync {
    fn next_line(&self, _tail: &TailInfo, _line: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn tail_started(&self, _tail: &TailInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn tail_stopped(&self, _tail: &TailInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn tail_paused(&self, _tail: &TailInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn tail_unpaused(&self, _tail: &TailInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn tail_reattached(&self, _tail: &TailInfo) -> anyhow::Result<()> {
        Ok(())
    }
}

fn deliver(listener: &dyn TailListener, tail: &TailInfo, event: &TailEvent) -> anyhow::Result<()> {
    match event {
        TailEvent::Line(line) => listener.next_line(tail, line),
        TailEvent::Started => listener.tail_started(tail),
        TailEvent::Stopped => listener.tail_stopped(tail),
        TailEvent::Paused => listener.tail_paused(tail),
        TailEvent::Unpaused => listener.tail_unpaused(tail),
        TailEvent::Reattached => listener.tail_reattached(tail),
    }
}

fn same_listener(a: &Arc<dyn TailListener>, b: &Arc<dyn TailListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Ordered, copy-on-write set of listeners. Dispatch works on a snapshot, so
/// listeners may be added or removed while events are in flight.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Arc<Vec<Arc<dyn TailListener>>>>,
}

impl ListenerSet {
    /// Returns false if this exact listener was already registered.
    pub(crate) fn add(&self, listener: Arc<dyn TailListener>) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn TailListener>) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        let next: Vec<_> = guard
            .iter()
            .filter(|existing| !same_listener(existing, listener))
            .cloned()
            .collect();
        let removed = next.len() != before;
        *guard = Arc::new(next);
        removed
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<dyn TailListener>>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }
}

pub(crate) struct Fanout {
    info: TailInfo,
    listeners: ListenerSet,
    sinks: Mutex<Vec<Box<dyn Write + Send>>>,
    events: broadcast::Sender<TailEvent>,
}

impl Fanout {
    pub(crate) fn new(info: TailInfo) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            info,
            listeners: ListenerSet::default(),
            sinks: Mutex::new(Vec::new()),
            events,
        }
    }

    pub(crate) fn info(&self) -> &TailInfo {
        &self.info
    }

    pub(crate) fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    pub(crate) fn add_sink(&self, sink: Box<dyn Write + Send>) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TailEvent> {
        self.events.subscribe()
    }

    pub(crate) fn line(&self, line: String) {
        self.write_sinks(&line);
        self.fire(TailEvent::Line(line));
    }

    pub(crate) fn fire(&self, event: TailEvent) {
        for listener in self.listeners.snapshot().iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                deliver(listener.as_ref(), &self.info, &event)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(tail = %self.info.name, event = event.name(), "Listener failed: {:#}", e);
                }
                Err(_) => {
                    error!(tail = %self.info.name, event = event.name(), "Listener panicked");
                }
            }
        }

        if self.events.receiver_count() > 0 {
            // Lagging subscribers lose old events; the send only fails with no receivers.
            let _ = self.events.send(event);
        }
    }

    fn write_sinks(&self, line: &str) {
        let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        for (index, sink) in sinks.iter_mut().enumerate() {
            let result = sink
                .write_all(line.as_bytes())
                .and_then(|_| sink.write_all(b"\n"))
                .and_then(|_| sink.flush());
            if let Err(e) = result {
                debug!(tail = %self.info.name, sink = index, "Sink write failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[derive(Default)]
    struct Collect(Mutex<Vec<TailEvent>>);

    impl Collect {
        fn events(&self) -> Vec<TailEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl TailListener for Collect {
        fn next_line(&self, _tail: &TailInfo, line: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(TailEvent::Line(line.to_string()));
            Ok(())
        }

        fn tail_started(&self, _tail: &TailInfo) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(TailEvent::Started);
            Ok(())
        }
    }

    struct Failing;

    impl TailListener for Failing {
        fn next_line(&self, _tail: &TailInfo, _line: &str) -> anyhow::Result<()> {
            bail!("refusing line")
        }

        fn tail_started(&self, _tail: &TailInfo) -> anyhow::Result<()> {
            panic!("boom")
        }
    }

    fn fanout() -> Fanout {
        Fanout::new(TailInfo {
            name: "test".to_string(),
            source: "memory".to_string(),
        })
    }

    #[test]
    fn duplicate_registration_ignored() {
        let set = ListenerSet::default();
        let listener: Arc<dyn TailListener> = Arc::new(Collect::default());
        assert!(set.add(listener.clone()));
        assert!(!set.add(listener.clone()));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&listener));
        assert!(!set.remove(&listener));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let fanout = fanout();
        let good = Arc::new(Collect::default());
        fanout.listeners().add(Arc::new(Failing));
        fanout.listeners().add(good.clone());

        fanout.fire(TailEvent::Started);
        fanout.line("one".to_string());

        assert_eq!(
            good.events(),
            vec![TailEvent::Started, TailEvent::Line("one".to_string())]
        );
    }

    #[test]
    fn listeners_called_in_registration_order() {
        struct Tagged(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl TailListener for Tagged {
            fn tail_started(&self, _tail: &TailInfo) -> anyhow::Result<()> {
                self.1.lock().unwrap().push(self.0);
                Ok(())
            }
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let fanout = fanout();
        for tag in ["a", "b", "c"] {
            fanout.listeners().add(Arc::new(Tagged(tag, order.clone())));
        }
        fanout.fire(TailEvent::Started);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn snapshot_survives_concurrent_removal() {
        let set = ListenerSet::default();
        let listener: Arc<dyn TailListener> = Arc::new(Collect::default());
        set.add(listener.clone());
        let snapshot = set.snapshot();
        set.remove(&listener);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn lines_written_to_sinks() {
        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let fanout = fanout();
        let sink = Shared::default();
        fanout.add_sink(Box::new(sink.clone()));
        fanout.line("alpha".to_string());
        fanout.line("beta".to_string());
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"alpha\nbeta\n");
    }

    #[test]
    fn subscribers_receive_events() {
        let fanout = fanout();
        let mut rx = fanout.subscribe();
        fanout.fire(TailEvent::Paused);
        fanout.line("x".to_string());
        assert_eq!(rx.try_recv().unwrap(), TailEvent::Paused);
        assert_eq!(rx.try_recv().unwrap(), TailEvent::Line("x".to_string()));
    }
}
