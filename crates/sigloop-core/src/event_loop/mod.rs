//! Re-entrant signal dispatch loop with nested ("modal") levels.
//!
//! ## Threading
//!
//! [`MainLoop`] is `!Send`: every handler runs on the thread that owns it.
//! Other threads talk to the loop through a [`LoopSender`], which only
//! enqueues. The queue stack is the single structure shared between threads
//! and sits behind one mutex; routing, level push and level pop all take it.
//!
//! ## Levels
//!
//! Level 1 is the outermost loop and lives as long as the [`MainLoop`].
//! [`MainLoop::enter_nested_loop`] pushes a level and drives it until a
//! handler calls [`MainLoop::leave_nested_loop`], then returns to its caller.
//! Termination is data: handlers return a [`Flow`], and each level driver
//! stops on the first non-`Continue` flow it sees.
//!
//! ## Waiting on a kind
//!
//! `process_signals(Some(kind))` takes a ticket for `kind` and keeps
//! dispatching (possibly re-entering nested levels) until a signal of that
//! kind has been taken off the active queue. The ticket is released at
//! dequeue time, before that signal's own handlers run.

pub mod queue;
pub mod signal;
pub mod ticket;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use queue::QueueStack;
use signal::{Payload, Signal, SignalKind};
use ticket::TicketMachine;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of a dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep dispatching.
    Continue,
    /// End the current loop level only.
    EndLevel,
    /// End every level up to [`MainLoop::run`].
    EndProcess,
}

impl Flow {
    pub fn is_continue(self) -> bool {
        matches!(self, Flow::Continue)
    }
}

/// Identity of a [`MainLoop`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

/// Identity of a registered handler, unique within its [`MainLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Callback = dyn Fn(&MainLoop, &Signal) -> Result<Flow>;

/// A registered handler. Auxiliary data is captured by the callback.
#[derive(Clone)]
struct SignalHandler {
    id: HandlerId,
    callback: Rc<Callback>,
}

#[derive(Debug, Default)]
struct SharedQueues {
    stack: Mutex<QueueStack>,
    ready: Condvar,
}

impl SharedQueues {
    fn lock(&self) -> MutexGuard<'_, QueueStack> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, signal: Signal) {
        let kind = signal.kind();
        let level = self.lock().route(signal);
        self.ready.notify_all();
        tracing::trace!(%kind, level, "signal enqueued");
    }

    fn try_dequeue(&self) -> Option<Signal> {
        self.lock().active_mut().dequeue()
    }

    /// Blocks until the active level has a signal, then takes it.
    fn dequeue_blocking(&self) -> Signal {
        let mut stack = self.lock();
        loop {
            if let Some(signal) = stack.active_mut().dequeue() {
                return signal;
            }
            stack = self
                .ready
                .wait(stack)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the active level has a signal, without taking it.
    fn wait_for_pending(&self) {
        let mut stack = self.lock();
        while stack.active().is_empty() {
            stack = self
                .ready
                .wait(stack)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Thread-safe enqueue handle for a [`MainLoop`].
#[derive(Clone)]
pub struct LoopSender {
    loop_id: LoopId,
    shared: Arc<SharedQueues>,
}

impl LoopSender {
    /// Routes `signal` to the innermost level owning its source, or to the
    /// active level.
    pub fn enqueue_signal(&self, signal: Signal) {
        self.shared.enqueue(signal);
    }
}

impl fmt::Debug for LoopSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopSender")
            .field("loop_id", &self.loop_id)
            .finish_non_exhaustive()
    }
}

/// Default signal loop.
pub struct MainLoop {
    id: LoopId,
    shared: Arc<SharedQueues>,
    handlers: RefCell<HashMap<SignalKind, Vec<SignalHandler>>>,
    next_handler: Cell<u64>,
    tickets: RefCell<TicketMachine<SignalKind>>,
    quit_callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("id", &self.id)
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

impl MainLoop {
    pub fn new() -> Self {
        Self {
            id: LoopId(NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed)),
            shared: Arc::new(SharedQueues::default()),
            handlers: RefCell::new(HashMap::new()),
            next_handler: Cell::new(1),
            tickets: RefCell::new(TicketMachine::new()),
            quit_callback: RefCell::new(None),
        }
    }

    pub fn id(&self) -> LoopId {
        self.id
    }

    /// Returns a handle other threads can enqueue through.
    pub fn sender(&self) -> LoopSender {
        LoopSender {
            loop_id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of active loop levels.
    pub fn depth(&self) -> usize {
        self.shared.lock().depth()
    }

    /// Pending signal count per level, outermost first.
    pub fn pending_signals(&self) -> Vec<usize> {
        self.shared.lock().pending()
    }

    /// Registers `callback` for every signal of `kind`.
    ///
    /// Handlers of one kind run in registration order. `data` is handed to
    /// every invocation. The returned id can be passed to
    /// [`MainLoop::remove_signal_handler`].
    pub fn register_signal_handler<D, F>(&self, kind: SignalKind, callback: F, data: D) -> HandlerId
    where
        D: 'static,
        F: Fn(&MainLoop, &Signal, &D) -> Result<Flow> + 'static,
    {
        let id = HandlerId(self.next_handler.get());
        self.next_handler.set(id.0 + 1);
        let handler = SignalHandler {
            id,
            callback: Rc::new(move |main_loop: &MainLoop, signal: &Signal| {
                callback(main_loop, signal, &data)
            }),
        };
        self.handlers
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push(handler);
        id
    }

    /// Unregisters a handler. A dispatch already in progress still runs it.
    ///
    /// Returns `false` when no such handler is registered for `kind`.
    pub fn remove_signal_handler(&self, kind: SignalKind, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Routes future signals from `source` to the active level, even while
    /// deeper levels are running.
    pub fn register_signal_source(&self, source: signal::SourceId) {
        self.shared.lock().active_mut().add_source(source);
    }

    /// Same as [`LoopSender::enqueue_signal`].
    pub fn enqueue_signal(&self, signal: Signal) {
        self.shared.enqueue(signal);
    }

    /// Registers a callback run once after [`MainLoop::run`] ends.
    pub fn set_quit_callback<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        *self.quit_callback.borrow_mut() = Some(Box::new(callback));
    }

    /// Drives the outermost level until a handler ends it.
    ///
    /// # Errors
    /// Returns the first error raised by a handler, including unhandled
    /// exception signals.
    pub fn run(&self) -> Result<()> {
        let flow = self.drive_level()?;
        tracing::debug!(?flow, "main loop finished");

        let callback = self.quit_callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }

    /// Pushes a level, enqueues `signal` into it and dispatches that level
    /// until it ends.
    ///
    /// Returns `Flow::Continue` once the level ended normally and
    /// `Flow::EndProcess` when the whole loop is shutting down; the caller
    /// should hand the latter back to its own driver.
    ///
    /// # Errors
    /// Propagates handler errors raised while the level was running.
    pub fn enter_nested_loop(&self, signal: Signal) -> Result<Flow> {
        let depth = {
            let mut stack = self.shared.lock();
            let depth = stack.push_level();
            stack.active_mut().enqueue(signal);
            depth
        };
        tracing::debug!(depth, "entered nested loop");

        let result = self.drive_level();

        // A quit or an error leaves the level behind.
        let dropped = self.shared.lock().truncate(depth - 1);
        if dropped > 0 {
            tracing::debug!(depth, dropped, "discarded abandoned loop levels");
        }

        match result? {
            Flow::EndProcess => Ok(Flow::EndProcess),
            Flow::Continue | Flow::EndLevel => Ok(Flow::Continue),
        }
    }

    /// Drains the active level, pops it and ends its driver.
    ///
    /// At the outermost level nothing is popped and `Flow::EndProcess` is
    /// returned. Return the flow from the calling handler.
    ///
    /// # Errors
    /// Propagates handler errors raised while draining.
    pub fn leave_nested_loop(&self) -> Result<Flow> {
        let flow = self.process_signals(None)?;
        if !flow.is_continue() {
            return Ok(flow);
        }

        let mut stack = self.shared.lock();
        let Some(mut level) = stack.pop_level() else {
            tracing::debug!("left outermost loop");
            return Ok(Flow::EndProcess);
        };
        // Signals routed here by another thread after the drain.
        while let Some(late) = level.dequeue() {
            stack.route(late);
        }
        tracing::debug!(depth = stack.depth() + 1, "left nested loop");
        Ok(Flow::EndLevel)
    }

    /// Dispatches signals of the active level.
    ///
    /// Without `wait_for`, returns once the active level is empty. With
    /// `wait_for`, blocks for new signals as needed and returns only after a
    /// signal of that kind was dequeued (by this call or by a re-entrant one)
    /// and the current dispatch iteration finished.
    ///
    /// Not thread safe: call it from the loop thread only.
    ///
    /// # Errors
    /// Propagates handler errors and unhandled exception signals.
    pub fn process_signals(&self, wait_for: Option<SignalKind>) -> Result<Flow> {
        let ticket = wait_for.map(|kind| (kind, self.tickets.borrow_mut().take_ticket(kind)));

        loop {
            let signal = if ticket.is_some() {
                self.shared.dequeue_blocking()
            } else {
                match self.shared.try_dequeue() {
                    Some(signal) => signal,
                    None => return Ok(Flow::Continue),
                }
            };

            self.tickets.borrow_mut().mark_line_to_go(&signal.kind());

            let flow = match self.dispatch(&signal) {
                Ok(flow) => flow,
                Err(err) => {
                    self.discard(ticket);
                    return Err(err);
                }
            };
            if !flow.is_continue() {
                self.discard(ticket);
                return Ok(flow);
            }

            if let Some((kind, id)) = ticket
                && self.tickets.borrow_mut().check_ticket(&kind, id)
            {
                return Ok(Flow::Continue);
            }
        }
    }

    fn discard(&self, ticket: Option<(SignalKind, ticket::TicketId)>) {
        if let Some((kind, id)) = ticket {
            self.tickets.borrow_mut().discard_ticket(&kind, id);
        }
    }

    fn drive_level(&self) -> Result<Flow> {
        loop {
            match self.process_signals(None)? {
                Flow::Continue => self.shared.wait_for_pending(),
                flow => return Ok(flow),
            }
        }
    }

    fn dispatch(&self, signal: &Signal) -> Result<Flow> {
        let handlers = self
            .handlers
            .borrow()
            .get(&signal.kind())
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            if signal.kind() == SignalKind::Exception {
                return Err(reraise(signal));
            }
            tracing::trace!(kind = %signal.kind(), "no handler registered");
            return Ok(Flow::Continue);
        }

        tracing::trace!(kind = %signal.kind(), handlers = handlers.len(), "dispatching signal");
        for handler in handlers {
            let flow = (handler.callback)(self, signal)?;
            if !flow.is_continue() {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }
}

fn reraise(signal: &Signal) -> anyhow::Error {
    match signal.payload() {
        Payload::Failure(failure) => anyhow::Error::new(failure.clone()),
        _ => match signal.source() {
            Some(source) => anyhow!("exception signal from {source} carried no failure"),
            None => anyhow!("exception signal carried no failure"),
        },
    }
}
