//! Cooperative task runtime (spec §4.7): priority-ordered scheduler
//! over task descriptors with owned stacks, a yield primitive, and
//! owner-sweep of global memory on destruction.
//!
//! Grounded on `hermit-os-kernel/src/scheduler/task.rs` for the shape
//! of the handle/priority/state newtypes (`TaskId`, `Priority`, a
//! status enum) — but hermit is `no_std` and switches contexts with
//! architecture-specific assembly, which has no portable safe-Rust
//! equivalent and isn't appropriate for a hosted, `std`-based crate
//! (see DESIGN.md's Open Question on this). Each task's "owned stack"
//! is instead backed by a real OS thread; `save-context`/`restore-
//! context` are implemented as a strict rendezvous handoff over
//! zero-capacity channels, so exactly one of {scheduler, one task} is
//! ever actually executing, preserving the single-RUNNING-task
//! invariant spec §5 requires without any interior locking.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;

use log::warn;
use thiserror::Error;

use crate::mem::GlobalMemoryTable;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    #[error("task table is at capacity")]
    Full,
    #[error("no live task has that handle")]
    NotFound,
    #[error("operation is invalid for the task's current state")]
    State,
    #[error("owned-memory list is at its per-task capacity")]
    MemFull,
    #[error("failed to spawn the task's backing thread")]
    Alloc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

const PRIORITY_ORDER: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Yielded,
    Terminated,
}

/// Marker unwound through a task's stack when its owning thread is
/// cancelled out from under it by `destroy`. Caught at the top of the
/// task's thread body; never allowed to propagate to the process.
struct TaskCancelled;

enum TaskSignal {
    Yielded,
    Terminated,
}

struct TaskChannels {
    resume_rx: Receiver<()>,
    report_tx: SyncSender<TaskSignal>,
}

thread_local! {
    static CURRENT: RefCell<Option<TaskChannels>> = const { RefCell::new(None) };
}

/// Suspends the calling task, handing control back to the scheduler
/// (spec §4.7, "yield primitive"). Panics if called from outside a
/// task thread spawned by `TaskTable::spawn`.
pub fn yield_now() {
    CURRENT.with(|cell| {
        let borrow = cell.borrow();
        let channels = borrow
            .as_ref()
            .expect("yield_now called outside a scheduled task");
        if channels.report_tx.send(TaskSignal::Yielded).is_err() {
            panic::panic_any(TaskCancelled);
        }
        if channels.resume_rx.recv().is_err() {
            panic::panic_any(TaskCancelled);
        }
    });
}

struct TaskControl {
    resume_tx: SyncSender<()>,
    report_rx: Receiver<TaskSignal>,
    join: Option<JoinHandle<()>>,
}

pub struct TaskDescriptor {
    pub handle: u32,
    pub state: TaskState,
    pub priority: Priority,
    pub owned_mem: Vec<u32>,
    control: TaskControl,
}

pub struct TaskTable {
    entries: Vec<Option<TaskDescriptor>>,
    capacity: usize,
    next_handle: u32,
    current: u32,
    owned_mem_cap: usize,
    stack_size: usize,
}

impl TaskTable {
    pub fn new(capacity: usize, stack_size: usize, owned_mem_cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            next_handle: 1,
            current: 0,
            owned_mem_cap,
            stack_size,
        }
    }

    fn alloc_handle(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        if self.next_handle == 0 {
            self.next_handle = 1;
        }
        h
    }

    /// The running task's handle, or 0 outside a scheduler pass.
    pub fn current_task(&self) -> u32 {
        self.current
    }

    pub fn find(&self, handle: u32) -> Option<&TaskDescriptor> {
        self.entries.iter().flatten().find(|t| t.handle == handle)
    }

    /// Spawns `entry(arg)` on a dedicated OS thread, parked until the
    /// first scheduler pass resumes it. The task starts READY.
    pub fn spawn<F>(&mut self, priority: Priority, entry: F, arg: usize) -> Result<u32, TaskError>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        let slot = if let Some(i) = self.entries.iter().position(|e| e.is_none()) {
            i
        } else {
            if self.entries.len() >= self.capacity {
                return Err(TaskError::Full);
            }
            self.entries.push(None);
            self.entries.len() - 1
        };

        let (resume_tx, resume_rx) = sync_channel::<()>(0);
        let (report_tx, report_rx) = sync_channel::<TaskSignal>(0);
        let report_tx_for_thread = report_tx.clone();

        let join = std::thread::Builder::new()
            .stack_size(self.stack_size)
            .spawn(move || {
                CURRENT.with(|cell| {
                    *cell.borrow_mut() = Some(TaskChannels {
                        resume_rx,
                        report_tx: report_tx_for_thread,
                    });
                });

                let first_resume = CURRENT.with(|cell| cell.borrow().as_ref().unwrap().resume_rx.recv());
                if first_resume.is_ok() {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| entry(arg)));
                    if let Err(payload) = result {
                        if payload.downcast_ref::<TaskCancelled>().is_none() {
                            warn!("task entry function panicked; task marked TERMINATED");
                        }
                    }
                }

                CURRENT.with(|cell| {
                    if let Some(channels) = cell.borrow().as_ref() {
                        let _ = channels.report_tx.send(TaskSignal::Terminated);
                    }
                });
            })
            .map_err(|_| TaskError::Alloc)?;

        let handle = self.alloc_handle();
        self.entries[slot] = Some(TaskDescriptor {
            handle,
            state: TaskState::Ready,
            priority,
            owned_mem: Vec::new(),
            control: TaskControl {
                resume_tx,
                report_rx,
                join: Some(join),
            },
        });
        Ok(handle)
    }

    /// Visits every READY or YIELDED task, HIGH → NORMAL → LOW, in
    /// table order within a bucket, switching each one in turn.
    /// Returns the number of switches performed (spec §4.7).
    pub fn run_one_pass(&mut self) -> usize {
        let mut switches = 0;
        for &priority in &PRIORITY_ORDER {
            let handles: Vec<u32> = self
                .entries
                .iter()
                .flatten()
                .filter(|t| {
                    t.priority == priority
                        && matches!(t.state, TaskState::Ready | TaskState::Yielded)
                })
                .map(|t| t.handle)
                .collect();

            for handle in handles {
                self.switch_to(handle);
                switches += 1;
            }
        }
        switches
    }

    fn switch_to(&mut self, handle: u32) {
        let slot = self
            .entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|t| t.handle == handle));
        let Some(slot) = slot else { return };

        self.entries[slot].as_mut().unwrap().state = TaskState::Running;
        self.current = handle;

        let signal = {
            let task = self.entries[slot].as_ref().unwrap();
            if task.control.resume_tx.send(()).is_err() {
                TaskSignal::Terminated
            } else {
                task.control.report_rx.recv().unwrap_or(TaskSignal::Terminated)
            }
        };

        self.current = 0;
        let task = self.entries[slot].as_mut().unwrap();
        match signal {
            TaskSignal::Yielded => task.state = TaskState::Yielded,
            TaskSignal::Terminated => {
                task.state = TaskState::Terminated;
                if let Some(join) = task.control.join.take() {
                    let _ = join.join();
                }
            }
        }
    }

    /// Forbidden on a RUNNING task. Otherwise cancels the backing
    /// thread (if still alive), joins it, and sweeps every global
    /// memory block this task owned. Returns the count of blocks
    /// freed.
    pub fn destroy(
        &mut self,
        handle: u32,
        global_mem: &mut GlobalMemoryTable,
    ) -> Result<usize, TaskError> {
        let slot = self
            .entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|t| t.handle == handle))
            .ok_or(TaskError::NotFound)?;

        if self.entries[slot].as_ref().unwrap().state == TaskState::Running {
            return Err(TaskError::State);
        }

        let mut task = self.entries[slot].take().unwrap();
        if task.state != TaskState::Terminated {
            drop(task.control.resume_tx);
            if let Some(join) = task.control.join.take() {
                let _ = join.join();
            }
        }

        Ok(global_mem.free_by_owner(task.handle))
    }

    pub fn own_mem(&mut self, handle: u32, gmem_handle: u32) -> Result<(), TaskError> {
        let task = self
            .entries
            .iter_mut()
            .flatten()
            .find(|t| t.handle == handle)
            .ok_or(TaskError::NotFound)?;
        if task.owned_mem.contains(&gmem_handle) {
            return Ok(());
        }
        if task.owned_mem.len() >= self.owned_mem_cap {
            return Err(TaskError::MemFull);
        }
        task.owned_mem.push(gmem_handle);
        Ok(())
    }

    pub fn disown_mem(&mut self, handle: u32, gmem_handle: u32) -> Result<(), TaskError> {
        let task = self
            .entries
            .iter_mut()
            .flatten()
            .find(|t| t.handle == handle)
            .ok_or(TaskError::NotFound)?;
        if let Some(pos) = task.owned_mem.iter().position(|&h| h == gmem_handle) {
            task.owned_mem.remove(pos);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::GlobalMemFlags;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn task_runs_yields_and_terminates_across_passes() {
        let mut table = TaskTable::new(4, 64 * 1024, 8);
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_for_task = ticks.clone();

        let h = table
            .spawn(
                Priority::Normal,
                move |_| {
                    ticks_for_task.fetch_add(1, Ordering::SeqCst);
                    yield_now();
                    ticks_for_task.fetch_add(1, Ordering::SeqCst);
                },
                0,
            )
            .unwrap();

        assert_eq!(table.find(h).unwrap().state, TaskState::Ready);

        table.run_one_pass();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(table.find(h).unwrap().state, TaskState::Yielded);

        table.run_one_pass();
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert_eq!(table.find(h).unwrap().state, TaskState::Terminated);
    }

    #[test]
    fn priority_buckets_run_high_before_normal_before_low() {
        let mut table = TaskTable::new(8, 64 * 1024, 8);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for (priority, tag) in [
            (Priority::Low, 3),
            (Priority::High, 1),
            (Priority::Normal, 2),
        ] {
            let order = order.clone();
            table
                .spawn(priority, move |_| order.lock().unwrap().push(tag), 0)
                .unwrap();
        }

        table.run_one_pass();
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn destroying_running_task_fails() {
        // A task can't observe itself as RUNNING from outside since
        // run_one_pass blocks until the task yields or returns; this
        // test instead checks the guard directly against a task we
        // force into the Running state.
        let mut table = TaskTable::new(4, 64 * 1024, 8);
        let h = table.spawn(Priority::Normal, |_| yield_now(), 0).unwrap();
        table.run_one_pass(); // now Yielded
        let slot = table
            .entries
            .iter()
            .position(|e| e.as_ref().unwrap().handle == h)
            .unwrap();
        table.entries[slot].as_mut().unwrap().state = TaskState::Running;

        let mut mem = GlobalMemoryTable::new(4);
        assert_eq!(table.destroy(h, &mut mem), Err(TaskError::State));
    }

    #[test]
    fn scenario_6_owner_sweep_on_destroy() {
        let mut table = TaskTable::new(4, 64 * 1024, 8);
        let mut mem = GlobalMemoryTable::new(4);

        let h = table.spawn(Priority::Normal, |_| yield_now(), 0).unwrap();
        table.run_one_pass(); // Yielded

        let g1 = mem.alloc(4, GlobalMemFlags::empty(), h).unwrap();
        table.own_mem(h, g1).unwrap();

        let freed = table.destroy(h, &mut mem).unwrap();
        assert_eq!(freed, 1);
        assert!(mem.find(g1).is_none());
    }

    #[test]
    fn own_mem_is_idempotent_and_capped() {
        let mut table = TaskTable::new(4, 64 * 1024, 1);
        let h = table.spawn(Priority::Normal, |_| yield_now(), 0).unwrap();
        table.own_mem(h, 10).unwrap();
        table.own_mem(h, 10).unwrap(); // dedup
        assert_eq!(table.find(h).unwrap().owned_mem.len(), 1);
        assert_eq!(table.own_mem(h, 11), Err(TaskError::MemFull));

        let mut mem = GlobalMemoryTable::new(4);
        table.run_one_pass();
        table.destroy(h, &mut mem).unwrap();
    }
}
