//! Core library for the hioki_daq tool.
//!
//! Drives a Hioki bench meter over its line-based TCP command port:
//!
//! - [`transport`]: CRLF-framed request/response over TCP, plus a scripted mock
//! - [`command`]: the command catalogue and the batch fragments are staged into
//! - [`session`]: one connection and its batch; flush policies
//! - [`scripting`]: sandboxed Rhai scripts driving the meter through a capability API
//! - [`sequencer`]: digital output pattern sequencing for unattended runs
//! - [`runner`]: connect, configure, then sample or run a script
//! - [`storage`]: CSV output
//! - [`config`], [`logging`], [`error`]: ambient plumbing

pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;
pub mod scripting;
pub mod sequencer;
pub mod session;
pub mod storage;
pub mod transport;
