//! `uiprobe` -- embedded loopback command server for live UI inspection.
//!
//! Lives inside an application process and lets automation tooling on the
//! same machine list windows, locate elements, read toasts, and pull
//! screen timing reports over a line-based TCP protocol. The application
//! keeps the server fed through window/focus callbacks and a [`HostContext`]
//! implementation; clients use [`ControlClient`] or any line-oriented TCP
//! tool.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`server`] | `AutomationServer` lifecycle + accept loop |
//! | [`window`] | `WindowRegistry`, concurrently-mutated window/focus store |
//! | [`pool`] | fixed-size worker pool with an unbounded queue |
//! | [`finder`] | poll-until-deadline element lookup |
//! | [`host`] | `HostContext` collaborator trait |
//! | [`timing`] | screen lifecycle timings + report sinks |
//! | [`config`] | `ServerConfig` defaults and env overrides |
//! | [`client`] | blocking `ControlClient` |
//! | [`error`] | `ServerError` enum via `thiserror` |

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod finder;
pub mod host;
pub mod pool;
pub mod server;
pub mod timing;
pub mod window;

pub use crate::client::ControlClient;
pub use crate::config::ServerConfig;
pub use crate::error::ServerError;
pub use crate::finder::ElementFinder;
pub use crate::host::{HostContext, Point, UiElement};
pub use crate::server::AutomationServer;
pub use crate::timing::{LifecyclePhase, LogSink, ReportSink, ScreenReportRow, ScreenTimings};
pub use crate::window::{WindowHandle, WindowInfo, WindowRegistry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
