//! Core sigloop library (dispatch loop, input coordination, config).
//!
//! - `event_loop`: signals, per-level queues, ticketing and [`MainLoop`]
//! - `input`: background input threads funnelled back as signals
//! - `config`: `${SIGLOOP_HOME}/config.toml` loading
//! - `logging`: tracing subscriber setup

pub mod config;
pub mod event_loop;
pub mod input;
pub mod logging;

pub use event_loop::signal::{Payload, RequestId, Signal, SignalKind, SourceId};
pub use event_loop::{Flow, HandlerId, LoopSender, MainLoop};
pub use input::{InputCoordinator, InputHandler, InputRequest};
