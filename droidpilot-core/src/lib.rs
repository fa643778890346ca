//! Agent orchestration for LLM-driven Android automation.
//!
//! A task runs as an explicit PLAN -> EXECUTE -> VERIFY -> REPORT cycle:
//! the model client turns the transcript into a plan or a final answer, the
//! tool executor validates and dispatches each requested call against the
//! device session, and the verify step decides whether to retry, re-plan,
//! or stop. The device itself is reached only through the [`DeviceDriver`]
//! port, implemented over adb in [`infrastructure::adb`].
//!
//! [`DeviceDriver`]: application::device::DeviceDriver

pub mod application;
pub mod config;
pub mod constants;
pub mod domain;
pub mod infrastructure;

pub use application::{agent, catalog, client, device, executor, registry, session};
pub use domain::{transcript, types};
pub use infrastructure::{adb, model, store};
