//! # File Monitor
//!
//! This crate provides asynchronous notification of file system changes.
//! Callers register directories or files and receive change events either by
//! blocking retrieval or by callbacks posted onto their own execution context.
//!
//! ## Features
//!
//! - **Blocking Retrieval**: `monitor` waits on the calling thread
//! - **Async Retrieval**: `async_monitor` never blocks; a background worker
//!   performs the wait and posts the result back
//! - **Safe Teardown**: every pending request resolves exactly once, with
//!   `Cancelled` when its engine or the service goes away
//! - **Pluggable Engines**: native or polling backends via `notify`, or any
//!   custom `WatchEngine`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Monitor Service                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  construct ──► MonitorHandle ──► WatchEngine (EventQueue)      │
//! │                     │                  ▲                        │
//! │                     ▼                  │ pop                    │
//! │  async_monitor ──► Worker ──► MonitorOperation                 │
//! │                                        │ post                   │
//! │                                        ▼                        │
//! │                                    Executor ──► handler         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod handle;
pub mod monitor;
pub mod notify_engine;
pub mod operation;
pub mod queue;
pub mod service;
mod worker;

pub use config::{Backend, MonitorConfig};
pub use engine::{EngineFactory, WatchEngine};
pub use error::{MonitorError, Result};
pub use event::{ChangeKind, FileMonitorEvent, WatchId};
pub use executor::{EventLoop, Executor, InlineExecutor, KeepAlive, Task, TokioExecutor};
pub use filter::PathFilter;
pub use handle::MonitorHandle;
pub use monitor::FileMonitor;
pub use notify_engine::NotifyEngine;
pub use operation::MonitorHandler;
pub use queue::EventQueue;
pub use service::MonitorService;
