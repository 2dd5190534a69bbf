//! The follow thread: backlog replay, then polling until told to stop.

use std::fs::{self, File};
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use service_lifecycle::ServiceState;
use tracing::{debug, info, warn};

use crate::backlog::read_backlog;
use crate::config::TailConfig;
use crate::listener::TailEvent;
use crate::source::{Input, LineReader, Poll, StreamReader};
use crate::tail::{Control, Shared};

enum Reader {
    File {
        path: PathBuf,
        lines: LineReader<BufReader<File>>,
    },
    Stream(LineReader<StreamReader>),
}

impl Reader {
    fn poll_line(&mut self) -> io::Result<Poll> {
        match self {
            Self::File { lines, .. } => lines.poll_line(),
            Self::Stream(lines) => lines.poll_line(),
        }
    }
}

/// Counts consecutive empty polls and decides when a file looks rewritten.
///
/// At `stat_after` misses the file's modification time is noted. At
/// `reattach_after` misses it is compared again: a file that shrank below
/// the read offset, or that changed without growing, gets reopened.
#[derive(Debug)]
pub(crate) struct MissCounter {
    stat_after: u32,
    reattach_after: u32,
    misses: u32,
    noted: Option<SystemTime>,
}

/// What the follow loop should do after an empty poll.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Wait,
    Reattach,
}

impl MissCounter {
    pub(crate) fn new(stat_after: u32, reattach_after: u32) -> Self {
        Self {
            stat_after,
            reattach_after,
            misses: 0,
            noted: None,
        }
    }

    /// Data arrived; start counting again.
    pub(crate) fn activity(&mut self) {
        self.misses = 0;
        self.noted = None;
    }

    /// Record an empty poll. `stat` is only called at the two thresholds and
    /// returns the file's current (length, modification time).
    pub(crate) fn miss(
        &mut self,
        offset: u64,
        stat: impl FnOnce() -> io::Result<(u64, SystemTime)>,
    ) -> Verdict {
        self.misses = self.misses.saturating_add(1);

        if self.misses == self.stat_after {
            self.noted = stat().ok().map(|(_, modified)| modified);
            return Verdict::Wait;
        }
        if self.misses < self.reattach_after {
            return Verdict::Wait;
        }

        // Keep checking every (reattach_after - stat_after) misses from here on.
        self.misses = self.stat_after;
        let Ok((len, modified)) = stat() else {
            return Verdict::Wait;
        };
        let rewritten = match self.noted {
            Some(noted) => modified > noted && len <= offset,
            None => false,
        };
        if len < offset || rewritten {
            self.activity();
            return Verdict::Reattach;
        }
        if len > offset {
            // Growth we have not read yet is an append, not a rewrite.
            self.activity();
            return Verdict::Wait;
        }
        self.noted = Some(modified);
        Verdict::Wait
    }
}

pub(crate) struct Follower {
    shared: Arc<Shared>,
    input: Option<Input>,
    generation: u64,
    backlog: usize,
    poll_interval: Duration,
    stat_after: u32,
    reattach_after: u32,
}

impl Follower {
    pub(crate) fn new(
        shared: Arc<Shared>,
        input: Input,
        generation: u64,
        config: &TailConfig,
    ) -> Self {
        Self {
            shared,
            input: Some(input),
            generation,
            backlog: config.backlog,
            poll_interval: config.poll_interval(),
            stat_after: config.stat_after_misses,
            reattach_after: config.reattach_after_misses,
        }
    }

    /// Thread body. Waits for `ready` so the started event goes out before
    /// any line, and hands a stream source back through `exit`.
    pub(crate) fn run(mut self, ready: Receiver<()>, exit: SyncSender<Option<StreamReader>>) {
        let name = self.shared.fanout.info().name.clone();
        let Some(input) = self.input.take() else {
            let _ = exit.send(None);
            return;
        };

        if ready.recv().is_err() {
            debug!(tail = %name, "Start abandoned before follow began");
            let _ = exit.send(match input {
                Input::Stream(stream) => Some(stream),
                Input::File { .. } => None,
            });
            return;
        }

        debug!(tail = %name, "Follow thread running");
        let reader = match input {
            Input::File { path, file } => self.attach(path, file),
            Input::Stream(stream) => Reader::Stream(LineReader::new(stream, 0)),
        };
        let returned = match self.follow(reader) {
            Reader::Stream(lines) => Some(lines.into_inner()),
            Reader::File { .. } => None,
        };

        debug!(tail = %name, "Follow thread exiting");
        let _ = exit.send(returned);
    }

    /// Replay the backlog and position the reader after the last complete
    /// line. If the replay fails the reader starts at the current end of the
    /// file instead, and following goes on.
    fn attach(&self, path: PathBuf, mut file: File) -> Reader {
        let resume_at = match self.replay_backlog(&mut file) {
            Ok(resume_at) => resume_at,
            Err(e) => {
                warn!(
                    tail = %self.shared.fanout.info().name,
                    path = %path.display(),
                    "Failed to replay backlog, following from the end: {}",
                    e
                );
                file.metadata().map(|meta| meta.len()).unwrap_or(0)
            }
        };

        let offset = match file.seek(SeekFrom::Start(resume_at)) {
            Ok(offset) => offset,
            Err(e) => {
                warn!(tail = %self.shared.fanout.info().name, "Seek failed: {}", e);
                file.stream_position().unwrap_or(0)
            }
        };
        Reader::File {
            path,
            lines: LineReader::new(BufReader::new(file), offset),
        }
    }

    /// Deliver the backlog lines and return the offset following resumes at.
    fn replay_backlog(&self, file: &mut File) -> io::Result<u64> {
        let len = file.metadata()?.len();
        let backlog = read_backlog(&mut *file, len, self.backlog)?;
        debug!(
            tail = %self.shared.fanout.info().name,
            lines = backlog.lines.len(),
            "Replaying backlog"
        );
        for line in backlog.lines {
            self.shared.fanout.line(line);
        }
        Ok(backlog.resume_at)
    }

    fn follow(&self, mut reader: Reader) -> Reader {
        let name = self.shared.fanout.info().name.clone();
        let mut counter = MissCounter::new(self.stat_after, self.reattach_after);

        loop {
            if !self.pause_point() {
                break;
            }

            match reader.poll_line() {
                Ok(Poll::Line(line)) => {
                    counter.activity();
                    self.shared.fanout.line(line);
                    continue;
                }
                Ok(Poll::Partial) => {
                    counter.activity();
                    continue;
                }
                Ok(Poll::Idle) => {}
                Err(e) => {
                    warn!(tail = %name, "Read failed: {}", e);
                }
            }

            if !self.sleep() {
                break;
            }

            let Reader::File { path, lines } = &mut reader else {
                continue;
            };
            let verdict = counter.miss(lines.offset(), || {
                let meta = fs::metadata(&*path)?;
                Ok((meta.len(), meta.modified()?))
            });
            if verdict == Verdict::Reattach {
                match File::open(&*path) {
                    Ok(file) => {
                        info!(tail = %name, path = %path.display(), "File rewritten, reattaching");
                        *lines = LineReader::new(BufReader::new(file), 0);
                        self.shared.fanout.fire(TailEvent::Reattached);
                    }
                    Err(e) => {
                        warn!(tail = %name, path = %path.display(), "Reattach failed: {}", e);
                    }
                }
            }
        }

        reader
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.shared
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn should_exit(&self, control: &Control) -> bool {
        control.pending_shutdown || control.generation != self.generation
    }

    /// Block while suspended. Returns false once the tail is shutting down.
    fn pause_point(&self) -> bool {
        {
            let control = self.control();
            if self.should_exit(&control) {
                return false;
            }
            if control.machine.state() != Some(ServiceState::Suspended) {
                return true;
            }
        }

        self.shared.fanout.fire(TailEvent::Paused);
        let exiting = {
            let mut control = self.control();
            while control.machine.state() == Some(ServiceState::Suspended)
                && !self.should_exit(&control)
            {
                control = self
                    .shared
                    .wake
                    .wait(control)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            self.should_exit(&control)
        };
        self.shared.fanout.fire(TailEvent::Unpaused);
        !exiting
    }

    /// Wait one poll interval, waking early on any lifecycle change. Returns
    /// false once the tail is shutting down.
    fn sleep(&self) -> bool {
        let control = self.control();
        if self.should_exit(&control) {
            return false;
        }
        let (control, _) = self
            .shared
            .wake
            .wait_timeout(control, self.poll_interval)
            .unwrap_or_else(PoisonError::into_inner);
        !self.should_exit(&control)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::sync::{Condvar, Mutex};

    use service_lifecycle::StateMachine;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::listener::{Fanout, TailInfo};

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn run(
        counter: &mut MissCounter,
        times: u32,
        offset: u64,
        len: u64,
        modified: SystemTime,
    ) -> Vec<Verdict> {
        (0..times)
            .map(|_| counter.miss(offset, || Ok((len, modified))))
            .collect()
    }

    #[test]
    fn unchanged_file_never_reattaches() {
        let mut counter = MissCounter::new(3, 6);
        let verdicts = run(&mut counter, 50, 100, 100, at(10));
        assert!(verdicts.iter().all(|v| *v == Verdict::Wait));
    }

    #[test]
    fn shrunk_file_reattaches_at_second_threshold() {
        let mut counter = MissCounter::new(3, 6);
        let verdicts = run(&mut counter, 6, 100, 20, at(10));
        assert!(verdicts[..5].iter().all(|v| *v == Verdict::Wait));
        assert_eq!(verdicts[5], Verdict::Reattach);
    }

    #[test]
    fn same_size_rewrite_detected_by_mtime() {
        let mut counter = MissCounter::new(3, 6);
        run(&mut counter, 3, 100, 100, at(10));
        let verdicts = run(&mut counter, 3, 100, 100, at(11));
        assert_eq!(verdicts.last(), Some(&Verdict::Reattach));
    }

    #[test]
    fn growth_is_not_a_rewrite() {
        let mut counter = MissCounter::new(3, 6);
        run(&mut counter, 3, 100, 100, at(10));
        let verdicts = run(&mut counter, 3, 100, 150, at(11));
        assert!(verdicts.iter().all(|v| *v == Verdict::Wait));
    }

    #[test]
    fn activity_resets_counting() {
        let mut counter = MissCounter::new(3, 6);
        run(&mut counter, 5, 100, 20, at(10));
        counter.activity();
        let verdicts = run(&mut counter, 5, 100, 20, at(10));
        assert!(verdicts.iter().all(|v| *v == Verdict::Wait));
    }

    #[test]
    fn keeps_checking_after_first_comparison() {
        let mut counter = MissCounter::new(3, 6);
        run(&mut counter, 6, 100, 100, at(10));
        // rewritten later on; caught within another (6 - 3) misses
        let verdicts = run(&mut counter, 3, 100, 10, at(12));
        assert_eq!(verdicts.last(), Some(&Verdict::Reattach));
    }

    #[test]
    fn stat_failure_waits() {
        let mut counter = MissCounter::new(1, 2);
        assert_eq!(counter.miss(0, || Err(io::Error::other("gone"))), Verdict::Wait);
        assert_eq!(counter.miss(0, || Err(io::Error::other("gone"))), Verdict::Wait);
    }

    fn follower(path: &std::path::Path, backlog: usize) -> Follower {
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                machine: StateMachine::new(),
                pending_shutdown: false,
                generation: 0,
            }),
            wake: Condvar::new(),
            fanout: Fanout::new(TailInfo {
                name: "tail-test".to_string(),
                source: path.display().to_string(),
            }),
        });
        let config = TailConfig {
            backlog,
            ..Default::default()
        };
        Follower::new(shared, Input::open_file(path).unwrap(), 1, &config)
    }

    fn file_offset(reader: &Reader) -> u64 {
        match reader {
            Reader::File { lines, .. } => lines.offset(),
            Reader::Stream(_) => panic!("expected a file reader"),
        }
    }

    #[test]
    fn replays_backlog_and_resumes_after_last_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\nc").unwrap();
        let follower = follower(&path, 5);
        let mut events = follower.shared.fanout.subscribe();

        let reader = follower.attach(path.clone(), File::open(&path).unwrap());
        assert_eq!(file_offset(&reader), 4);
        assert_eq!(events.try_recv().unwrap(), TailEvent::Line("a".to_string()));
        assert_eq!(events.try_recv().unwrap(), TailEvent::Line("b".to_string()));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn failed_backlog_still_follows_from_the_end() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\n").unwrap();
        let follower = follower(&path, 5);
        let mut events = follower.shared.fanout.subscribe();

        // Reading a write-only handle fails, so the backlog cannot be replayed.
        let unreadable = OpenOptions::new().write(true).open(&path).unwrap();
        let reader = follower.attach(path.clone(), unreadable);
        assert_eq!(file_offset(&reader), 4);
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }
}
