//! # Event Loop
//!
//! A single-threaded reactor over epoll. Sources are file descriptors, one-shot
//! timers, signals and idle callbacks; all handlers run synchronously on the
//! thread that calls [`EventLoop::dispatch`].
//!
//! ## Invariants
//!
//! - No loop state is borrowed while a handler runs, so handlers may add,
//!   update and remove sources (their own included).
//! - A handler that panics is logged and the loop carries on.
//! - Idle callbacks queued while idles are running wait for the next pass.
//! - Destroying the loop fires its destroy listeners first, then releases
//!   every source and the epoll descriptor.
//!
//! The loop is `!Send`: handlers need not be `Send`, and the whole loop stays
//! on the thread that created it.

mod sys;

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::rc::Rc;
use std::rc::Weak;

use bitflags::bitflags;

use crate::error::Error;
use crate::error::Result;
use crate::signal::ListenerHandle;
use crate::signal::Signal;
use crate::signal::panic_message;

bitflags! {
    /// Readiness of a file descriptor, as both interest and result.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Interest: u32 {
        const READABLE = 1;
        const WRITABLE = 2;
        const HANGUP   = 4;
        const ERROR    = 8;
    }
}

impl Interest {
    fn to_epoll(self) -> u32 {
        let mut events = 0;
        if self.contains(Self::READABLE) {
            events |= libc::EPOLLIN as u32;
        }
        if self.contains(Self::WRITABLE) {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }

    fn from_epoll(events: u32) -> Self {
        let mut mask = Self::empty();
        if events & libc::EPOLLIN as u32 != 0 {
            mask |= Self::READABLE;
        }
        if events & libc::EPOLLOUT as u32 != 0 {
            mask |= Self::WRITABLE;
        }
        if events & libc::EPOLLHUP as u32 != 0 {
            mask |= Self::HANGUP;
        }
        if events & libc::EPOLLERR as u32 != 0 {
            mask |= Self::ERROR;
        }
        mask
    }
}

/// What a handler asks of the post-dispatch check pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PostAction {
    #[default]
    Continue,
    /// Run the check pass again.
    Recheck,
}

#[derive(Clone, Debug)]
pub struct EventLoopConfig {
    /// Readiness events collected per wait.
    pub max_events: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self { max_events: 32 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Fd,
    Timer,
    Signal,
    Idle,
}

type FdHandler = Rc<RefCell<Box<dyn FnMut(RawFd, Interest) -> PostAction>>>;
type TimerHandler = Rc<RefCell<Box<dyn FnMut() -> PostAction>>>;
type SignalHandler = Rc<RefCell<Box<dyn FnMut(i32) -> PostAction>>>;
type IdleHandler = Box<dyn FnOnce()>;

enum Source {
    Fd { fd: RawFd, handler: FdHandler },
    Timer { timer: Rc<sys::TimerFd>, handler: TimerHandler },
    Signal { signal: i32, fd: Rc<sys::SignalFd>, handler: SignalHandler },
}

impl Source {
    fn registered_fd(&self) -> RawFd {
        match self {
            Self::Fd { fd, .. } => *fd,
            Self::Timer { timer, .. } => timer.raw(),
            Self::Signal { fd, .. } => fd.raw(),
        }
    }
}

/// A handler pulled out of the table so it can run with no borrow held.
enum Ready {
    Fd(RawFd, FdHandler),
    Timer(Rc<sys::TimerFd>, TimerHandler),
    Signal(i32, Rc<sys::SignalFd>, SignalHandler),
}

struct State {
    epoll: sys::Epoll,
    config: EventLoopConfig,
    sources: HashMap<u64, Source>,
    idles: VecDeque<(u64, IdleHandler)>,
    checks: Vec<u64>,
    next_token: u64,
}

impl State {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn ready(&self, token: u64) -> Option<Ready> {
        Some(match self.sources.get(&token)? {
            Source::Fd { fd, handler } => Ready::Fd(*fd, Rc::clone(handler)),
            Source::Timer { timer, handler } => Ready::Timer(Rc::clone(timer), Rc::clone(handler)),
            Source::Signal { signal, fd, handler } => Ready::Signal(*signal, Rc::clone(fd), Rc::clone(handler)),
        })
    }
}

struct Inner {
    state: RefCell<Option<State>>,
    destroyed: Signal,
}

impl Inner {
    fn with<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state.borrow_mut();
        let state = state.as_mut().ok_or_else(|| Error::AlreadyDestroyed("event loop".into()))?;
        f(state)
    }
}

pub struct EventLoop {
    inner: Rc<Inner>,
}

/// Handle to a source registered on an [`EventLoop`].
///
/// Clonable so a handler can hold its own source. Does not keep the loop alive.
#[derive(Clone)]
pub struct EventSource {
    inner: Weak<Inner>,
    token: u64,
    kind: SourceKind,
}

fn guarded<T: Default>(what: &'static str, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            tracing::error!(source = what, panic = %panic_message(payload.as_ref()), "event handler panicked");
            T::default()
        }
    }
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Self::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Result<Self> {
        let epoll = sys::Epoll::new().map_err(Error::Io)?;
        let state = State {
            epoll,
            config,
            sources: HashMap::new(),
            idles: VecDeque::new(),
            checks: Vec::new(),
            next_token: 0,
        };
        Ok(Self {
            inner: Rc::new(Inner { state: RefCell::new(Some(state)), destroyed: Signal::new() }),
        })
    }

    fn source(&self, token: u64, kind: SourceKind) -> EventSource {
        EventSource { inner: Rc::downgrade(&self.inner), token, kind }
    }

    /// Watches `fd` for `interest`. The loop never closes `fd`.
    pub fn add_fd(
        &self,
        fd: RawFd,
        interest: Interest,
        handler: impl FnMut(RawFd, Interest) -> PostAction + 'static,
    ) -> Result<EventSource> {
        let token = self.inner.with(|state| {
            let token = state.token();
            state.epoll.add(fd, interest.to_epoll(), token).map_err(Error::Io)?;
            let handler: FdHandler = Rc::new(RefCell::new(Box::new(handler)));
            state.sources.insert(token, Source::Fd { fd, handler });
            Ok(token)
        })?;
        tracing::trace!(fd, token, ?interest, "fd source added");
        Ok(self.source(token, SourceKind::Fd))
    }

    /// Adds a disarmed one-shot timer. Arm it with [`EventSource::update_timer`].
    pub fn add_timer(&self, handler: impl FnMut() -> PostAction + 'static) -> Result<EventSource> {
        let token = self.inner.with(|state| {
            let timer = sys::TimerFd::new().map_err(Error::Io)?;
            let token = state.token();
            state.epoll.add(timer.raw(), libc::EPOLLIN as u32, token).map_err(Error::Io)?;
            let handler: TimerHandler = Rc::new(RefCell::new(Box::new(handler)));
            state.sources.insert(token, Source::Timer { timer: Rc::new(timer), handler });
            Ok(token)
        })?;
        Ok(self.source(token, SourceKind::Timer))
    }

    /// Blocks `signal` for the calling thread and delivers it through
    /// [`dispatch`](Self::dispatch) instead.
    pub fn add_signal(&self, signal: i32, handler: impl FnMut(i32) -> PostAction + 'static) -> Result<EventSource> {
        let token = self.inner.with(|state| {
            let fd = sys::SignalFd::new(signal).map_err(Error::Io)?;
            let token = state.token();
            state.epoll.add(fd.raw(), libc::EPOLLIN as u32, token).map_err(Error::Io)?;
            let handler: SignalHandler = Rc::new(RefCell::new(Box::new(handler)));
            state.sources.insert(token, Source::Signal { signal, fd: Rc::new(fd), handler });
            Ok(token)
        })?;
        tracing::trace!(signal, token, "signal source added");
        Ok(self.source(token, SourceKind::Signal))
    }

    /// Runs `handler` once, on the next dispatch pass.
    pub fn add_idle(&self, handler: impl FnOnce() + 'static) -> Result<EventSource> {
        let token = self.inner.with(|state| {
            let token = state.token();
            state.idles.push_back((token, Box::new(handler)));
            Ok(token)
        })?;
        Ok(self.source(token, SourceKind::Idle))
    }

    /// Runs the idle callbacks pending right now. Returns how many ran.
    pub fn dispatch_idle(&self) -> Result<usize> {
        let pending = self.inner.with(|state| Ok(std::mem::take(&mut state.idles)))?;
        let count = pending.len();
        for (_, idle) in pending {
            guarded("idle", idle);
        }
        Ok(count)
    }

    /// Runs pending idles, waits up to `timeout_ms` for readiness (negative
    /// waits forever, zero polls) and runs each ready source once, followed by
    /// the check pass. Returns the number of sources dispatched.
    pub fn dispatch(&self, timeout_ms: i32) -> Result<u32> {
        self.dispatch_idle()?;

        let (epoll, mut events) = self.inner.with(|state| {
            Ok((state.epoll.raw(), sys::empty_events(state.config.max_events)))
        })?;
        let ready = match sys::wait(epoll, &mut events, timeout_ms) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(Error::Wait(e)),
        };

        let mut dispatched = 0;
        for event in &events[..ready] {
            let token = event.u64;
            let mask = Interest::from_epoll(event.events);
            if self.fire(token, mask)? {
                dispatched += 1;
            }
        }
        self.run_checks()?;
        tracing::trace!(ready, dispatched, "dispatch pass");
        Ok(dispatched)
    }

    /// Runs the source behind `token`. `false` if it was removed meanwhile or
    /// had nothing to deliver.
    fn fire(&self, token: u64, mask: Interest) -> Result<bool> {
        let Some(ready) = self.inner.with(|state| Ok(state.ready(token)))? else {
            return Ok(false);
        };
        Ok(match ready {
            Ready::Fd(fd, handler) => {
                invoke("fd", &handler, |h| h(fd, mask));
                true
            }
            Ready::Timer(timer, handler) => {
                if timer.drain().map_err(Error::Io)? == 0 {
                    return Ok(false);
                }
                invoke("timer", &handler, |h| h());
                true
            }
            Ready::Signal(_, fd, handler) => {
                let mut delivered = false;
                while let Some(signal) = fd.read_signal().map_err(Error::Io)? {
                    invoke("signal", &handler, |h| h(signal));
                    delivered = true;
                }
                delivered
            }
        })
    }

    /// Calls every checked source with an empty mask, repeating while any
    /// handler asks for another pass.
    fn run_checks(&self) -> Result<()> {
        loop {
            let tokens = self.inner.with(|state| Ok(state.checks.clone()))?;
            let mut again = false;
            for token in tokens {
                let Some(ready) = self.inner.with(|state| Ok(state.ready(token)))? else {
                    continue;
                };
                let action = match ready {
                    Ready::Fd(fd, handler) => invoke("fd", &handler, |h| h(fd, Interest::empty())),
                    Ready::Timer(_, handler) => invoke("timer", &handler, |h| h()),
                    Ready::Signal(signal, _, handler) => invoke("signal", &handler, |h| h(signal)),
                };
                again |= action == PostAction::Recheck;
            }
            if !again {
                return Ok(());
            }
        }
    }

    /// The epoll descriptor, for nesting this loop in another one.
    pub fn fd(&self) -> Result<RawFd> {
        self.inner.with(|state| Ok(state.epoll.raw()))
    }

    /// Runs `callback` once when the loop is destroyed.
    pub fn add_destroy_listener(&self, callback: impl FnOnce() + Send + 'static) -> ListenerHandle {
        self.inner.destroyed.subscribe(callback)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.is_fired()
    }

    /// Number of registered fd, timer and signal sources plus pending idles.
    pub fn source_count(&self) -> usize {
        self.inner
            .with(|state| Ok(state.sources.len() + state.idles.len()))
            .unwrap_or(0)
    }

    /// Fires the destroy listeners, then releases every source.
    pub fn destroy(&self) -> Result<()> {
        self.inner.destroyed.emit("event loop")?;
        let released = self.inner.state.borrow_mut().take();
        // Handlers are dropped here, after the borrow is gone.
        if let Some(state) = released {
            tracing::debug!(sources = state.sources.len(), idles = state.idles.len(), "event loop destroyed");
            drop(state);
        }
        Ok(())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if !self.inner.destroyed.is_fired() {
            if let Err(e) = self.destroy() {
                tracing::warn!(error = %e, "destroying event loop on drop failed");
            }
        }
    }
}

fn invoke<H: ?Sized>(what: &'static str, handler: &Rc<RefCell<Box<H>>>, call: impl FnOnce(&mut H) -> PostAction) -> PostAction {
    let Ok(mut handler) = handler.try_borrow_mut() else {
        tracing::trace!(source = what, "handler already running; skipped");
        return PostAction::Continue;
    };
    guarded(what, || call(&mut **handler))
}

impl EventSource {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    fn inner(&self) -> Result<Rc<Inner>> {
        self.inner.upgrade().ok_or_else(|| Error::AlreadyDestroyed("event loop".into()))
    }

    fn unknown(&self) -> Error {
        Error::AlreadyDestroyed(format!("{:?} source {}", self.kind, self.token))
    }

    /// Whether the source is still registered.
    pub fn is_active(&self) -> bool {
        let Ok(inner) = self.inner() else {
            return false;
        };
        inner
            .with(|state| {
                Ok(state.sources.contains_key(&self.token)
                    || state.idles.iter().any(|(token, _)| *token == self.token))
            })
            .unwrap_or(false)
    }

    /// Replaces the interest set of an fd source.
    pub fn update_fd(&self, interest: Interest) -> Result<()> {
        self.inner()?.with(|state| match state.sources.get(&self.token) {
            Some(Source::Fd { fd, .. }) => {
                state.epoll.modify(*fd, interest.to_epoll(), self.token).map_err(Error::Io)
            }
            Some(_) => Err(Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "not an fd source"))),
            None => Err(self.unknown()),
        })
    }

    /// Arms the timer to fire once, `ms` from now. Zero disarms it.
    pub fn update_timer(&self, ms: u32) -> Result<()> {
        self.inner()?.with(|state| match state.sources.get(&self.token) {
            Some(Source::Timer { timer, .. }) => timer.set(ms).map_err(Error::Io),
            Some(_) => Err(Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "not a timer source"))),
            None => Err(self.unknown()),
        })
    }

    /// Runs this source with an empty mask after every dispatch pass.
    pub fn check(&self) -> Result<()> {
        self.inner()?.with(|state| {
            if !state.sources.contains_key(&self.token) {
                return Err(self.unknown());
            }
            if !state.checks.contains(&self.token) {
                state.checks.push(self.token);
            }
            Ok(())
        })
    }

    /// Unregisters the source. Takes effect for every later wait.
    pub fn remove(&self) -> Result<()> {
        let removed = self.inner()?.with(|state| {
            state.checks.retain(|token| *token != self.token);
            if let Some(index) = state.idles.iter().position(|(token, _)| *token == self.token) {
                state.idles.remove(index);
                return Ok(true);
            }
            let Some(source) = state.sources.remove(&self.token) else {
                return Ok(false);
            };
            if let Err(e) = state.epoll.delete(source.registered_fd()) {
                // The caller may have closed its fd before removing the source.
                tracing::debug!(token = self.token, error = %e, "epoll delete failed");
            }
            Ok(true)
        })?;
        if removed { Ok(()) } else { Err(self.unknown()) }
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.token)
    }
}
