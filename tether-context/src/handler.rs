//! Synchronous request handling
//!
//! Every request produces a [`RequestRecord`]. The handler keeps only the
//! most recent one, advances its revision once per request and hands the
//! record to its watchers. A failing or panicking step never escapes
//! [`RequestHandler::handle_request`]; it becomes an `InternalError` record.

use crate::aspect::Aspect;
use crate::error::HandlerFault;
use crate::log::LogSink;
use crate::types::{AspectId, LogId};
use crate::watcher::{event_watcher, EventWatcher, WatcherList};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tether_weak::{Owner, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok = 200,
    Accepted = 202,
    InternalError = 500,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "Ok",
            StatusCode::Accepted => "Accepted",
            StatusCode::InternalError => "InternalError",
        };
        f.write_str(name)
    }
}

/// Outcome of one request, immutable once built
#[derive(Debug)]
pub struct RequestRecord<Req, Res> {
    identity: LogId,
    request_identity: LogId,
    handler: AspectId,
    request: Req,
    response: Option<Res>,
    status: StatusCode,
    fault: Option<HandlerFault>,
    request_time: DateTime<Utc>,
    response_time: DateTime<Utc>,
}

impl<Req, Res> RequestRecord<Req, Res> {
    fn build(
        handler: AspectId,
        request_identity: Option<LogId>,
        request_time: DateTime<Utc>,
        request: Req,
        status: StatusCode,
        response: Option<Res>,
        fault: Option<HandlerFault>,
    ) -> Self {
        let identity = LogId::next();
        Self {
            identity,
            request_identity: request_identity.unwrap_or(identity),
            handler,
            request,
            response,
            status,
            fault,
            request_time,
            response_time: Utc::now(),
        }
    }

    pub(crate) fn accepted(handler: AspectId, request_time: DateTime<Utc>, request: Req) -> Self {
        Self::build(handler, None, request_time, request, StatusCode::Accepted, None, None)
    }

    pub(crate) fn ok(
        handler: AspectId,
        request_identity: Option<LogId>,
        request_time: DateTime<Utc>,
        request: Req,
        response: Res,
    ) -> Self {
        Self::build(
            handler,
            request_identity,
            request_time,
            request,
            StatusCode::Ok,
            Some(response),
            None,
        )
    }

    pub(crate) fn failed(
        handler: AspectId,
        request_identity: Option<LogId>,
        request_time: DateTime<Utc>,
        request: Req,
        fault: HandlerFault,
    ) -> Self {
        Self::build(
            handler,
            request_identity,
            request_time,
            request,
            StatusCode::InternalError,
            None,
            Some(fault),
        )
    }

    /// Identity of this record
    pub fn identity(&self) -> LogId {
        self.identity
    }

    /// Identity of the request this record answers
    ///
    /// Equal to [`RequestRecord::identity`] for synchronous requests; for
    /// suspendable ones it is the identity of the `Accepted` record.
    pub fn request_identity(&self) -> LogId {
        self.request_identity
    }

    pub fn handler(&self) -> AspectId {
        self.handler
    }

    pub fn request(&self) -> &Req {
        &self.request
    }

    pub fn response(&self) -> Option<&Res> {
        self.response.as_ref()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn fault(&self) -> Option<&HandlerFault> {
        self.fault.as_ref()
    }

    pub fn request_time(&self) -> DateTime<Utc> {
        self.request_time
    }

    pub fn response_time(&self) -> DateTime<Utc> {
        self.response_time
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    pub fn is_accepted(&self) -> bool {
        self.status == StatusCode::Accepted
    }

    pub fn is_error(&self) -> bool {
        self.fault.is_some()
    }
}

impl<Req: fmt::Debug, Res: fmt::Debug> fmt::Display for RequestRecord<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.fault, &self.response) {
            (Some(fault), _) => write!(f, "[{}] {:?} -> {}", self.status, self.request, fault),
            (None, Some(response)) => {
                write!(f, "[{}] {:?} -> {:?}", self.status, self.request, response)
            }
            (None, None) => write!(f, "[{}] {:?}", self.status, self.request),
        }
    }
}

/// The step of a synchronous handler
pub trait Handle<Req, Res> {
    fn handle(&self, req: &Req) -> anyhow::Result<Res>;
}

impl<Req, Res, F> Handle<Req, Res> for F
where
    F: Fn(&Req) -> anyhow::Result<Res>,
{
    fn handle(&self, req: &Req) -> anyhow::Result<Res> {
        self(req)
    }
}

/// Record keeping shared by the synchronous and suspendable handlers
pub(crate) struct HandlerCore<Req: 'static, Res: 'static> {
    pub(crate) aspect: Aspect,
    pub(crate) last: RefCell<Option<Rc<RequestRecord<Req, Res>>>>,
    pub(crate) watchers: WatcherList<RequestRecord<Req, Res>>,
}

impl<Req, Res> HandlerCore<Req, Res>
where
    Req: fmt::Debug + 'static,
    Res: fmt::Debug + 'static,
{
    pub(crate) fn new(aspect: Aspect) -> Self {
        Self {
            aspect,
            last: RefCell::new(None),
            watchers: WatcherList::new(),
        }
    }

    /// Store `record` in `slot`, bump the revision, log and notify
    pub(crate) fn settle(
        &self,
        slot: &RefCell<Option<Rc<RequestRecord<Req, Res>>>>,
        record: RequestRecord<Req, Res>,
        label: &str,
    ) -> Rc<RequestRecord<Req, Res>> {
        let record = Rc::new(record);
        *slot.borrow_mut() = Some(Rc::clone(&record));
        self.aspect.advance_revision();
        if record.is_error() {
            self.aspect.error(format_args!("{} Failed: {}", label, record));
        } else if self.aspect.debug_enabled() {
            self.aspect.debug(format_args!("{}: {}", label, record));
        }
        self.watchers.notify(&self.aspect, &record);
        record
    }

    pub(crate) fn add_watcher_fn<O, F>(&self, owner: &Rc<O>, f: F) -> Rc<Subscription<F>>
    where
        O: Owner + 'static,
        F: Fn(&Aspect, &RequestRecord<Req, Res>) + 'static,
    {
        let watcher = event_watcher(owner, f);
        self.watchers.add(&watcher);
        watcher
    }
}

/// Request/response handler with an immediate step
pub struct RequestHandler<Req: 'static, Res: 'static> {
    core: HandlerCore<Req, Res>,
    step: Box<dyn Handle<Req, Res>>,
}

impl<Req, Res> RequestHandler<Req, Res>
where
    Req: fmt::Debug + 'static,
    Res: fmt::Debug + 'static,
{
    pub fn new(name: impl Into<String>, step: impl Handle<Req, Res> + 'static) -> Self {
        Self::with_aspect(Aspect::new(name), step)
    }

    pub fn with_sink(
        name: impl Into<String>,
        sink: Rc<dyn LogSink>,
        step: impl Handle<Req, Res> + 'static,
    ) -> Self {
        Self::with_aspect(Aspect::with_sink(name, sink), step)
    }

    pub fn with_aspect(aspect: Aspect, step: impl Handle<Req, Res> + 'static) -> Self {
        Self {
            core: HandlerCore::new(aspect),
            step: Box::new(step),
        }
    }

    pub fn aspect(&self) -> &Aspect {
        &self.core.aspect
    }

    /// Run the step and record its outcome
    pub fn handle_request(&self, req: Req) -> Rc<RequestRecord<Req, Res>> {
        let request_time = Utc::now();
        let handler = self.core.aspect.id();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.step.handle(&req)));
        let record = match outcome {
            Ok(Ok(response)) => RequestRecord::ok(handler, None, request_time, req, response),
            Ok(Err(err)) => {
                RequestRecord::failed(handler, None, request_time, req, HandlerFault::Step(err))
            }
            Err(payload) => RequestRecord::failed(
                handler,
                None,
                request_time,
                req,
                HandlerFault::from_panic(payload),
            ),
        };
        self.core.settle(&self.core.last, record, "HandleRequest")
    }

    pub fn last(&self) -> Option<Rc<RequestRecord<Req, Res>>> {
        self.core.last.borrow().clone()
    }

    pub fn add_watcher<W: EventWatcher<RequestRecord<Req, Res>> + 'static>(
        &self,
        watcher: &Rc<W>,
    ) -> bool {
        self.core.watchers.add(watcher)
    }

    pub fn add_watcher_fn<O, F>(&self, owner: &Rc<O>, f: F) -> Rc<Subscription<F>>
    where
        O: Owner + 'static,
        F: Fn(&Aspect, &RequestRecord<Req, Res>) + 'static,
    {
        self.core.add_watcher_fn(owner, f)
    }

    pub fn remove_watcher<W: EventWatcher<RequestRecord<Req, Res>> + 'static>(
        &self,
        watcher: &Rc<W>,
    ) -> bool {
        self.core.watchers.remove(watcher)
    }

    pub fn watcher_count(&self) -> usize {
        self.core.watchers.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CollectingSink;
    use tether_weak::ScopedOwner;

    fn parse(req: &String) -> anyhow::Result<i64> {
        Ok(req.trim().parse::<i64>()?)
    }

    #[test]
    fn test_ok_record() {
        let handler = RequestHandler::new("parser", parse);
        let record = handler.handle_request(" 42 ".to_string());

        assert!(record.is_ok());
        assert_eq!(record.status().code(), 200);
        assert_eq!(record.response(), Some(&42));
        assert!(record.fault().is_none());
        assert_eq!(record.request_identity(), record.identity());
        assert_eq!(record.handler(), handler.aspect().id());
        assert!(record.request_time() <= record.response_time());
        assert_eq!(handler.aspect().revision(), 1);
    }

    #[test]
    fn test_step_error_is_contained() {
        let sink = Rc::new(CollectingSink::new());
        let handler = RequestHandler::with_sink("parser", sink.clone(), parse);
        let record = handler.handle_request("nope".to_string());

        assert_eq!(record.status(), StatusCode::InternalError);
        assert!(record.is_error());
        assert!(matches!(record.fault(), Some(HandlerFault::Step(_))));
        assert!(record.response().is_none());
        assert_eq!(sink.errors().len(), 1);
        assert!(sink.errors()[0].starts_with("HandleRequest Failed: [InternalError] \"nope\""));
    }

    #[test]
    fn test_panic_is_contained() {
        let handler = RequestHandler::new("boom", |_: &u8| -> anyhow::Result<u8> {
            panic!("step exploded")
        });
        let record = handler.handle_request(1);

        match record.fault() {
            Some(HandlerFault::Panicked(message)) => assert_eq!(message, "step exploded"),
            other => panic!("unexpected fault: {:?}", other),
        }
        assert_eq!(handler.aspect().revision(), 1);
    }

    #[test]
    fn test_watchers_see_every_record() {
        let handler = RequestHandler::new("parser", parse);
        let owner = ScopedOwner::new();
        let statuses = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&statuses);
        handler.add_watcher_fn(&owner, move |_, record| log.borrow_mut().push(record.status()));

        handler.handle_request("1".to_string());
        handler.handle_request("x".to_string());
        let last = handler.last().map(|record| record.request().clone());

        assert_eq!(
            *statuses.borrow(),
            vec![StatusCode::Ok, StatusCode::InternalError]
        );
        assert_eq!(last.as_deref(), Some("x"));
        assert_eq!(handler.aspect().revision(), 2);
        assert_eq!(handler.watcher_count(), 1);
    }

    #[test]
    fn test_record_display() {
        let handler = RequestHandler::new("parser", parse);
        let record = handler.handle_request("7".to_string());
        assert_eq!(record.to_string(), "[Ok] \"7\" -> 7");
    }
}
