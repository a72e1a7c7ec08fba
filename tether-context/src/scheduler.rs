//! Host scheduler for suspendable handlers
//!
//! Suspendable steps never drive themselves. They are spawned onto a
//! [`HostScheduler`] and suspend by awaiting the futures it hands out.
//! [`FrameScheduler`] is a frame-stepped implementation on top of a
//! single-threaded `futures` executor.

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// What the handlers need from the host
pub trait HostScheduler {
    /// Schedule `task` to begin running
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);

    /// A future that completes once the scheduler grants the next resume
    fn next_frame(&self) -> LocalBoxFuture<'static, ()>;
}

#[derive(Default)]
struct FrameClock {
    frame: Cell<u64>,
    waiters: RefCell<Vec<Waker>>,
}

impl FrameClock {
    fn advance(&self) -> u64 {
        let frame = self.frame.get() + 1;
        self.frame.set(frame);
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }
        frame
    }
}

/// Completes once the clock reaches `target`
struct NextFrame {
    clock: Rc<FrameClock>,
    target: u64,
}

impl Future for NextFrame {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.clock.frame.get() >= self.target {
            return Poll::Ready(());
        }
        self.clock.waiters.borrow_mut().push(cx.waker().clone());
        Poll::Pending
    }
}

/// Frame-stepped scheduler
///
/// Nothing runs until [`FrameScheduler::tick`]. Each tick advances the frame
/// counter, wakes everything waiting on [`HostScheduler::next_frame`] and
/// drives the pool until no task can make progress.
pub struct FrameScheduler {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    clock: Rc<FrameClock>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
            clock: Rc::new(FrameClock::default()),
        }
    }

    /// Current frame number
    pub fn frame(&self) -> u64 {
        self.clock.frame.get()
    }

    /// Advance one frame and run everything that became ready
    ///
    /// Must not be called from inside a task driven by this scheduler; such
    /// a nested tick is ignored.
    pub fn tick(&self) -> u64 {
        let Ok(mut pool) = self.pool.try_borrow_mut() else {
            tracing::warn!(frame = self.frame(), "nested tick ignored");
            return self.frame();
        };
        let frame = self.clock.advance();
        pool.run_until_stalled();
        frame
    }

    /// Tick `frames` times
    pub fn run_frames(&self, frames: u64) -> u64 {
        for _ in 0..frames {
            self.tick();
        }
        self.frame()
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostScheduler for FrameScheduler {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(err) = self.spawner.spawn_local(task) {
            tracing::error!(error = %err, "failed to spawn task");
        }
    }

    fn next_frame(&self) -> LocalBoxFuture<'static, ()> {
        NextFrame {
            clock: Rc::clone(&self.clock),
            target: self.clock.frame.get() + 1,
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_work_waits_for_tick() {
        let scheduler = FrameScheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        scheduler.spawn(async move { flag.set(true) }.boxed_local());

        assert!(!ran.get());
        scheduler.tick();
        assert!(ran.get());
    }

    #[test]
    fn test_next_frame_resumes_one_tick_later() {
        let scheduler = Rc::new(FrameScheduler::new());
        let steps = Rc::new(RefCell::new(Vec::new()));

        let host = Rc::clone(&scheduler);
        let log = Rc::clone(&steps);
        scheduler.spawn(
            async move {
                for step in 0..3 {
                    log.borrow_mut().push((step, host.frame()));
                    host.next_frame().await;
                }
            }
            .boxed_local(),
        );

        scheduler.run_frames(4);
        assert_eq!(*steps.borrow(), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_next_frame_target_fixed_at_creation() {
        let scheduler = FrameScheduler::new();
        let frame = scheduler.next_frame();
        scheduler.tick();
        assert!(frame.now_or_never().is_some());
    }

    #[test]
    fn test_nested_tick_is_ignored() {
        let scheduler = Rc::new(FrameScheduler::new());
        let inner_frame = Rc::new(Cell::new(0));
        let host = Rc::clone(&scheduler);
        let seen = Rc::clone(&inner_frame);
        scheduler.spawn(async move { seen.set(host.tick()) }.boxed_local());

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(inner_frame.get(), 1);
    }
}
