//! The interface to every external collaborator the scheduler consumes as
//! an opaque hook ("dynamic dispatch over per-architecture context
//! switch").
//!
//! The host scheduler picks one concrete implementation at build time and
//! calls it through a handle; we model that here as a single trait object
//! held by [`crate::scheduler::Scheduler`] rather than per-architecture
//! `cfg` blocks, since this crate does not itself target any one
//! architecture.

use crate::scheduler::task::{CoreId, TaskId};

/// Opaque handles the scheduler hands back to [`ArchHooks::switch`] so the
/// embedder can tell which logical task is being switched from/to. The
/// scheduler does not interpret these beyond passing them through.
pub trait ArchHooks: Send + Sync {
	/// Perform the actual context switch from `prev` to `next` on `cpu`.
	/// Called with the runqueue lock already released; must
	/// not return until `prev` has fully yielded the CPU.
	fn switch(&self, cpu: CoreId, prev: TaskId, next: TaskId);

	/// Optional hook run just before `switch`, e.g. to save lazy FPU state.
	fn start_context_switch(&self, _cpu: CoreId, _prev: TaskId, _next: TaskId) {}

	/// Optional hook run just after `switch` completes and the new task is
	/// live, e.g. to flush a lazy MMU/TLB state or release `prev`'s mm.
	fn end_context_switch(&self, _cpu: CoreId, _prev: TaskId, _next: TaskId) {}

	/// Monotonic nanosecond clock for `cpu`. Must be non-decreasing across
	/// calls for the same `cpu`.
	fn monotonic_clock_ns(&self, cpu: CoreId) -> u64;

	/// Nanoseconds of IRQ time accounted to `cpu` since boot, subtracted
	/// from `monotonic_clock_ns` to derive `clock_task`.
	fn irq_time_ns(&self, cpu: CoreId) -> u64 {
		let _ = cpu;
		0
	}

	/// Nanoseconds of stolen (hypervisor) time accounted to `cpu` since
	/// boot.
	fn steal_time_ns(&self, cpu: CoreId) -> u64 {
		let _ = cpu;
		0
	}

	/// Deliver a reschedule IPI to `cpu`. Not called if the target's
	/// current task is polling for reschedule (IPI elision).
	fn send_reschedule_ipi(&self, cpu: CoreId);

	/// Run `f` on `cpu` with that CPU under exclusive stopper control, used
	/// for forced migration and hotplug drain.
	fn stop_one_cpu(&self, cpu: CoreId, f: &dyn Fn());

	/// True if `cpu`'s current task has opted into polling for reschedule
	/// instead of requiring an IPI (IPI elision). Default: always
	/// requires an IPI.
	fn is_polling_for_resched(&self, cpu: CoreId) -> bool {
		let _ = cpu;
		false
	}
}
