//! Suspendable request handling
//!
//! A [`CoroutineRequestHandler`] answers every request with an `Accepted`
//! record right away and runs the step on the host scheduler. Per request:
//!
//! ```text
//! Accepted -> Running (suspended zero or more times) -> Ok | InternalError
//! ```
//!
//! The step stages its response through its [`StepContext`] before it
//! returns. Finishing without one is an `InternalError` with
//! [`HandlerFault::NoResponseProduced`]. [`CoroutineRequestHandler::stop_all`]
//! cancels every in-flight request without producing a record for it.

use crate::aspect::Aspect;
use crate::error::HandlerFault;
use crate::handler::{HandlerCore, RequestRecord};
use crate::log::LogSink;
use crate::scheduler::HostScheduler;
use crate::types::LogId;
use crate::watcher::EventWatcher;
use chrono::{DateTime, Utc};
use futures::future::{abortable, AbortHandle, FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};
use tether_weak::{Owner, Subscription};

type Responses<Res> = RefCell<HashMap<LogId, Res>>;

/// Handle a suspendable step uses to talk back to its handler
pub struct StepContext<Res> {
    identity: LogId,
    responses: Weak<Responses<Res>>,
    scheduler: Rc<dyn HostScheduler>,
}

impl<Res> StepContext<Res> {
    /// Identity of the request being handled
    pub fn identity(&self) -> LogId {
        self.identity
    }

    /// Stage the response, replacing any earlier one
    ///
    /// Returns false if the handler is gone.
    pub fn stage_response(&self, response: Res) -> bool {
        match self.responses.upgrade() {
            Some(responses) => {
                responses.borrow_mut().insert(self.identity, response);
                true
            }
            None => false,
        }
    }

    pub fn has_staged_response(&self) -> bool {
        self.responses
            .upgrade()
            .is_some_and(|responses| responses.borrow().contains_key(&self.identity))
    }

    /// Suspend until the scheduler's next frame
    pub fn next_frame(&self) -> LocalBoxFuture<'static, ()> {
        self.scheduler.next_frame()
    }
}

impl<Res> Clone for StepContext<Res> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity,
            responses: Weak::clone(&self.responses),
            scheduler: Rc::clone(&self.scheduler),
        }
    }
}

impl<Res> fmt::Debug for StepContext<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("identity", &self.identity)
            .finish()
    }
}

/// The step of a suspendable handler
pub trait AsyncHandle<Req, Res> {
    fn handle(&self, ctx: StepContext<Res>, req: Req) -> LocalBoxFuture<'static, anyhow::Result<()>>;
}

impl<Req, Res, F> AsyncHandle<Req, Res> for F
where
    F: Fn(StepContext<Res>, Req) -> LocalBoxFuture<'static, anyhow::Result<()>>,
{
    fn handle(&self, ctx: StepContext<Res>, req: Req) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        self(ctx, req)
    }
}

struct Inner<Req: 'static, Res: 'static> {
    core: HandlerCore<Req, Res>,
    last_async: RefCell<Option<Rc<RequestRecord<Req, Res>>>>,
    running: RefCell<HashMap<LogId, AbortHandle>>,
    responses: Rc<Responses<Res>>,
    step: Box<dyn AsyncHandle<Req, Res>>,
    scheduler: Rc<dyn HostScheduler>,
}

impl<Req, Res> Inner<Req, Res>
where
    Req: Clone + fmt::Debug + 'static,
    Res: fmt::Debug + 'static,
{
    fn context(&self, identity: LogId) -> StepContext<Res> {
        StepContext {
            identity,
            responses: Rc::downgrade(&self.responses),
            scheduler: Rc::clone(&self.scheduler),
        }
    }

    fn finish(&self, identity: LogId, record: RequestRecord<Req, Res>) {
        self.running.borrow_mut().remove(&identity);
        self.responses.borrow_mut().remove(&identity);
        self.core
            .settle(&self.last_async, record, "HandleRequestAsync");
    }
}

impl<Req: 'static, Res: 'static> Drop for Inner<Req, Res> {
    fn drop(&mut self) {
        for (_, handle) in self.running.get_mut().drain() {
            handle.abort();
        }
    }
}

/// Drive one request from its start frame to its final record
async fn execute<Req, Res>(
    inner: Weak<Inner<Req, Res>>,
    identity: LogId,
    request_time: DateTime<Utc>,
    req: Req,
    start: LocalBoxFuture<'static, ()>,
) where
    Req: Clone + fmt::Debug + 'static,
    Res: fmt::Debug + 'static,
{
    start.await;

    let step = match inner.upgrade() {
        Some(inner) => inner.step.handle(inner.context(identity), req.clone()),
        None => return,
    };
    let outcome = AssertUnwindSafe(step).catch_unwind().await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let handler = inner.core.aspect.id();
    let record = match outcome {
        Ok(Ok(())) => {
            let staged = inner.responses.borrow_mut().remove(&identity);
            match staged {
                Some(response) => {
                    RequestRecord::ok(handler, Some(identity), request_time, req, response)
                }
                None => RequestRecord::failed(
                    handler,
                    Some(identity),
                    request_time,
                    req,
                    HandlerFault::NoResponseProduced {
                        handler: inner.core.aspect.name().to_string(),
                    },
                ),
            }
        }
        Ok(Err(err)) => RequestRecord::failed(
            handler,
            Some(identity),
            request_time,
            req,
            HandlerFault::Step(err),
        ),
        Err(payload) => RequestRecord::failed(
            handler,
            Some(identity),
            request_time,
            req,
            HandlerFault::from_panic(payload),
        ),
    };
    inner.finish(identity, record);
}

/// Request/response handler whose step may suspend
pub struct CoroutineRequestHandler<Req: 'static, Res: 'static> {
    inner: Rc<Inner<Req, Res>>,
}

impl<Req, Res> CoroutineRequestHandler<Req, Res>
where
    Req: Clone + fmt::Debug + 'static,
    Res: fmt::Debug + 'static,
{
    pub fn new(
        name: impl Into<String>,
        scheduler: Rc<dyn HostScheduler>,
        step: impl AsyncHandle<Req, Res> + 'static,
    ) -> Self {
        Self::with_aspect(Aspect::new(name), scheduler, step)
    }

    pub fn with_sink(
        name: impl Into<String>,
        sink: Rc<dyn LogSink>,
        scheduler: Rc<dyn HostScheduler>,
        step: impl AsyncHandle<Req, Res> + 'static,
    ) -> Self {
        Self::with_aspect(Aspect::with_sink(name, sink), scheduler, step)
    }

    pub fn with_aspect(
        aspect: Aspect,
        scheduler: Rc<dyn HostScheduler>,
        step: impl AsyncHandle<Req, Res> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                core: HandlerCore::new(aspect),
                last_async: RefCell::new(None),
                running: RefCell::new(HashMap::new()),
                responses: Rc::new(RefCell::new(HashMap::new())),
                step: Box::new(step),
                scheduler,
            }),
        }
    }

    pub fn aspect(&self) -> &Aspect {
        &self.inner.core.aspect
    }

    /// Build the execution for `accepted`, clearing any stale staged response
    fn prepare(&self, accepted: &RequestRecord<Req, Res>) -> LocalBoxFuture<'static, ()> {
        let identity = accepted.identity();
        self.inner.responses.borrow_mut().remove(&identity);
        let start = self.inner.scheduler.next_frame();
        execute(
            Rc::downgrade(&self.inner),
            identity,
            accepted.request_time(),
            accepted.request().clone(),
            start,
        )
        .boxed_local()
    }

    /// Accept `req` and start running the step on the scheduler
    ///
    /// The step does not run before the scheduler's next frame, so the
    /// returned `Accepted` record is always observed first.
    pub fn handle_request(&self, req: Req) -> Rc<RequestRecord<Req, Res>> {
        let accepted = RequestRecord::accepted(self.aspect().id(), Utc::now(), req);
        let (task, handle) = abortable(self.prepare(&accepted));
        self.inner
            .running
            .borrow_mut()
            .insert(accepted.identity(), handle);
        self.inner.scheduler.spawn(task.map(|_| ()).boxed_local());
        self.inner
            .core
            .settle(&self.inner.core.last, accepted, "HandleRequest")
    }

    /// The execution for `req`, for the caller to drive itself
    ///
    /// Nothing is recorded until the execution finishes; it is not counted
    /// as running and [`CoroutineRequestHandler::stop_all`] does not reach it.
    pub fn handle_request_detached(&self, req: Req) -> LocalBoxFuture<'static, ()> {
        let accepted = RequestRecord::accepted(self.aspect().id(), Utc::now(), req);
        self.prepare(&accepted)
    }

    /// Cancel every in-flight request
    ///
    /// Cancelled requests produce no record and notify nobody.
    pub fn stop_all(&self) {
        let running = std::mem::take(&mut *self.inner.running.borrow_mut());
        let mut responses = self.inner.responses.borrow_mut();
        for (identity, handle) in running {
            handle.abort();
            responses.remove(&identity);
        }
    }

    /// Number of requests in flight
    pub fn running_count(&self) -> usize {
        self.inner.running.borrow().len()
    }

    /// Most recent record from [`CoroutineRequestHandler::handle_request`]
    pub fn last(&self) -> Option<Rc<RequestRecord<Req, Res>>> {
        self.inner.core.last.borrow().clone()
    }

    /// Most recent final record of a suspendable execution
    pub fn last_async(&self) -> Option<Rc<RequestRecord<Req, Res>>> {
        self.inner.last_async.borrow().clone()
    }

    pub fn add_watcher<W: EventWatcher<RequestRecord<Req, Res>> + 'static>(
        &self,
        watcher: &Rc<W>,
    ) -> bool {
        self.inner.core.watchers.add(watcher)
    }

    pub fn add_watcher_fn<O, F>(&self, owner: &Rc<O>, f: F) -> Rc<Subscription<F>>
    where
        O: Owner + 'static,
        F: Fn(&Aspect, &RequestRecord<Req, Res>) + 'static,
    {
        self.inner.core.add_watcher_fn(owner, f)
    }

    pub fn remove_watcher<W: EventWatcher<RequestRecord<Req, Res>> + 'static>(
        &self,
        watcher: &Rc<W>,
    ) -> bool {
        self.inner.core.watchers.remove(watcher)
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.core.watchers.count()
    }
}
