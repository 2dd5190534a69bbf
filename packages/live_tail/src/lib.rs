//! Live Tail - follow a growing file or stream
//!
//! A [`Tail`] replays the last few lines of a file, then keeps polling it for
//! new ones and hands each line to its [`TailListener`]s. It can be paused and
//! resumed without losing its place, notices when a log file is truncated and
//! rewritten underneath it, and can be stopped and started again.
//!
//! Its lifecycle is a [`service_lifecycle::StateMachine`] built for the
//! startable + suspendable capability set, so illegal calls such as resuming a
//! tail that is not suspended fail instead of being ignored.
//!
//! # Example
//!
//! ```no_run
//! use live_tail::{Tail, TailConfig, TailEvent, TailSource};
//!
//! let config = TailConfig {
//!     backlog: 50,
//!     ..Default::default()
//! };
//! let tail = Tail::with_config(TailSource::file("/var/log/app.log"), config)?;
//! let mut events = tail.subscribe();
//! tail.start()?;
//!
//! while let Ok(event) = events.blocking_recv() {
//!     if let TailEvent::Line(line) = event {
//!         println!("{line}");
//!     }
//! }
//! # Ok::<(), live_tail::TailError>(())
//! ```

mod backlog;
pub mod config;
mod error;
mod follow;
pub mod listener;
mod source;
mod tail;

pub use config::TailConfig;
pub use error::{Result, TailError};
pub use listener::{TailEvent, TailInfo, TailListener};
pub use source::TailSource;
pub use tail::Tail;
