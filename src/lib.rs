//! Drive a headless "monkey" browser instance over its stdio line protocol.
//!
//! The child process speaks a newline-delimited ASCII protocol on its
//! stdin/stdout: commands go in (`WINDOW GO …`), events come back
//! (`WINDOW START_THROBBER …`). This crate spawns the child, multiplexes
//! its event stream with a timer queue on a single-threaded cooperative
//! pump, keeps per-window state machines up to date, and exposes
//! synchronous-looking primitives (`load_page`, `redraw`, `wait_for_log`)
//! over the event-driven channel.
//!
//! ```no_run
//! use monkeyoxide::{Browser, BrowserConfig};
//!
//! async fn smoke_test() -> monkeyoxide::Result<()> {
//!     let config = BrowserConfig::builder()
//!         .executable("./nsmonkey")
//!         .build()
//!         .expect("browser config");
//!     let mut browser = Browser::launch(config)?;
//!
//!     let win = browser.new_window(Some("file:///tmp/index.html")).await?;
//!     browser.wait_loaded(&win, None).await?;
//!     let plots = browser.redraw(&win, None, None).await?;
//!     assert!(!plots.is_empty());
//!
//!     browser.quit_and_wait(None).await?;
//!     Ok(())
//! }
//! ```
//!
//! The session is the single owner of all state; there is no locking
//! because there is no concurrent mutation. For several browser children,
//! create several sessions.
//!
//! The `driver` feature (on by default) adds a YAML test-plan interpreter
//! and the `monkey-driver` binary built on the session API.

mod async_process;
pub mod browser;
#[cfg(feature = "driver")]
pub mod driver;
pub mod error;
pub mod protocol;
pub mod pump;
pub mod transport;
pub mod window;

pub use crate::browser::{
    default_executable, AuthEntry, Browser, BrowserConfig, BrowserConfigBuilder, CertEntry,
    CertWindow, LogFilter, LoginWindow, DEFAULT_TIMEOUT,
};
pub use crate::error::{MonkeyError, Result};
pub use crate::protocol::{ClickKind, Inbound, LogRecord, MouseButton, PlotCmd, ProtocolError};
pub use crate::pump::TimerToken;
pub use crate::window::{Window, WindowId};
