//! A priority-bitmap multi-queue CPU scheduler core.
//!
//! This crate implements the dispatcher a kernel uses to decide which
//! runnable task executes next on each hardware CPU: per-CPU runqueues
//! indexed by a priority bitmap, a global "watermark" map used to pick a
//! target CPU on wakeup, inter-CPU pull migration, SMT sibling balancing,
//! priority inheritance, and the policy/affinity contract surface a kernel
//! exposes to user space.
//!
//! Architecture-specific concerns (register/stack context switch, timer and
//! clock sources, interrupt delivery, per-task FPU/MM state) are not
//! implemented here. The embedder supplies them through [`hooks::ArchHooks`].

#![no_std]
#![warn(rust_2018_idioms)]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod bitmap;
pub mod config;
pub mod error;
pub mod hooks;
pub mod scheduler;
pub mod topology;

pub use error::SchedError;
pub use scheduler::Scheduler;
pub use scheduler::policy::{Caller, YieldMode};
pub use scheduler::task::{CoreId, Nice, Policy, Priority, TaskHandle, TaskId};
