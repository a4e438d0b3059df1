//! Serializes background input acquisition for a [`MainLoop`].
//!
//! Requests are kept on a stack. At most one worker thread is active at a
//! time; when several requests are pending, the most recently pushed one is
//! served next ("last asked wins"). A worker never touches coordinator state:
//! it reports back by enqueueing an `InputReceived` signal, and the
//! coordinator finishes the request on the loop thread.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};

use crate::config::InputConfig;
use crate::event_loop::signal::{
    InputOutcome, InputPayload, Payload, RequestId, SharedFailure, Signal, SignalKind, SourceId,
};
use crate::event_loop::{Flow, LoopId, LoopSender, MainLoop};

/// A blocking input acquisition run on a background thread.
pub trait InputRequest: Send + 'static {
    /// Originator that receives the `InputReady` signal.
    fn source(&self) -> SourceId;

    /// Blocks until input is available. Runs on a worker thread.
    fn get_input(&mut self) -> Result<String>;
}

/// Raised when a second request starts while one is pending and strict
/// checking was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrentInputError {
    /// Sources of every pending request, oldest first, including the rejected one.
    pub sources: Vec<SourceId>,
}

impl fmt::Display for ConcurrentInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Can't run multiple input threads at the same time!")?;
        write!(f, "Asking for input:")?;
        for source in &self.sources {
            write!(f, "\nInput handler: {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConcurrentInputError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorState {
    #[default]
    Idle,
    Active(RequestId),
}

struct PendingInput {
    id: RequestId,
    source: SourceId,
    /// Taken when the worker starts.
    request: Option<Box<dyn InputRequest>>,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    stack: Vec<PendingInput>,
    state: CoordinatorState,
    registered_loop: Option<LoopId>,
    next_id: u64,
    thread_name: String,
    concurrent_check: bool,
}

/// Input thread coordinator. Cheap to clone; lives on the loop thread.
#[derive(Clone)]
pub struct InputCoordinator {
    inner: Rc<RefCell<Inner>>,
}

impl fmt::Debug for InputCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("InputCoordinator")
            .field("state", &inner.state)
            .field("pending", &inner.stack.len())
            .finish_non_exhaustive()
    }
}

impl Default for InputCoordinator {
    fn default() -> Self {
        Self::new(&InputConfig::default())
    }
}

impl InputCoordinator {
    pub fn new(config: &InputConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                stack: Vec::new(),
                state: CoordinatorState::Idle,
                registered_loop: None,
                next_id: 1,
                thread_name: config.thread_name.clone(),
                concurrent_check: config.concurrent_check,
            })),
        }
    }

    /// Whether requesters should ask for strict concurrency checking by default.
    pub fn concurrent_check(&self) -> bool {
        self.inner.borrow().concurrent_check
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.borrow().state
    }

    /// Sources of pending requests, oldest first.
    pub fn pending_sources(&self) -> Vec<SourceId> {
        self.inner.borrow().stack.iter().map(|p| p.source).collect()
    }

    /// Queues `request` and starts a worker for it unless one is running.
    ///
    /// With `concurrent_check`, a second pending request is rejected and
    /// removed again; without it, the newest request is served first once
    /// the running worker reports back.
    ///
    /// # Errors
    /// Returns [`ConcurrentInputError`] on a rejected concurrent request, or
    /// an error if the worker thread can't be spawned.
    pub fn start_input_thread(
        &self,
        main_loop: &MainLoop,
        request: Box<dyn InputRequest>,
        concurrent_check: bool,
    ) -> Result<RequestId> {
        self.bind(main_loop);

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = RequestId(inner.next_id);
            inner.next_id += 1;
            let source = request.source();
            inner.stack.push(PendingInput {
                id,
                source,
                request: Some(request),
                worker: None,
            });

            if inner.stack.len() > 1 {
                if concurrent_check {
                    let sources = inner.stack.iter().map(|p| p.source).collect();
                    inner.stack.pop();
                    return Err(ConcurrentInputError { sources }.into());
                }
                tracing::warn!(
                    pending = inner.stack.len(),
                    "Running concurrently multiple inputs. Last who asked wins! \
                     Others will get input after this one."
                );
            }
            id
        };

        self.start_next(&main_loop.sender())?;
        Ok(id)
    }

    /// Registers the completion handler on `main_loop` once.
    fn bind(&self, main_loop: &MainLoop) {
        if self.inner.borrow().registered_loop == Some(main_loop.id()) {
            return;
        }
        main_loop.register_signal_handler(
            SignalKind::InputReceived,
            |main_loop, signal, coordinator: &InputCoordinator| {
                coordinator.on_input_received(main_loop, signal)
            },
            self.clone(),
        );
        self.inner.borrow_mut().registered_loop = Some(main_loop.id());
    }

    fn start_next(&self, sender: &LoopSender) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != CoordinatorState::Idle {
            return Ok(());
        }
        let thread_name = inner.thread_name.clone();
        let Some(pos) = inner.stack.iter().rposition(|p| p.request.is_some()) else {
            return Ok(());
        };

        let entry = &mut inner.stack[pos];
        let (id, source) = (entry.id, entry.source);
        let Some(request) = entry.request.take() else {
            return Ok(());
        };
        let sender = sender.clone();

        let spawned = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_worker(id, source, request, &sender));

        match spawned {
            Ok(handle) => {
                inner.stack[pos].worker = Some(handle);
                inner.state = CoordinatorState::Active(id);
                tracing::debug!(%id, %source, "input worker started");
                Ok(())
            }
            Err(err) => {
                inner.stack.remove(pos);
                Err(err).with_context(|| format!("failed to spawn input thread for {source}"))
            }
        }
    }

    fn on_input_received(&self, main_loop: &MainLoop, signal: &Signal) -> Result<Flow> {
        let Payload::Input(InputPayload { request, outcome }) = signal.payload() else {
            tracing::warn!("input-received signal without input payload");
            return Ok(Flow::Continue);
        };

        let finished = {
            let mut inner = self.inner.borrow_mut();
            let Some(pos) = inner.stack.iter().position(|p| p.id == *request) else {
                tracing::warn!(%request, "input received for unknown request");
                return Ok(Flow::Continue);
            };
            inner.stack.remove(pos)
        };

        let ready = match outcome {
            InputOutcome::Value(value) => Signal::input_ready(finished.source, value.clone()),
            InputOutcome::Failed(failure) => Signal::new(SignalKind::Exception, Some(finished.source))
                .with_payload(Payload::Failure(failure.clone())),
        };
        main_loop.enqueue_signal(ready);

        if let Some(worker) = finished.worker {
            join_worker(worker);
        }

        {
            let mut inner = self.inner.borrow_mut();
            if inner.state == CoordinatorState::Active(*request) {
                inner.state = CoordinatorState::Idle;
            }
        }
        tracing::debug!(%request, source = %finished.source, "input request satisfied");

        self.start_next(&main_loop.sender())?;
        Ok(Flow::Continue)
    }
}

fn run_worker(id: RequestId, source: SourceId, mut request: Box<dyn InputRequest>, sender: &LoopSender) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| request.get_input()))
        .unwrap_or_else(|_| Err(anyhow!("input worker for {source} panicked")));

    let outcome = match result {
        Ok(value) => InputOutcome::Value(value),
        Err(err) => InputOutcome::Failed(SharedFailure::from_anyhow(err)),
    };
    let payload = Payload::Input(InputPayload {
        request: id,
        outcome,
    });
    // No source: completion must run on whichever level is active, the
    // requester's level only gets the resulting `InputReady`.
    sender.enqueue_signal(Signal::new(SignalKind::InputReceived, None).with_payload(payload));
}

fn join_worker(worker: JoinHandle<()>) {
    if worker.join().is_err() {
        tracing::warn!("input worker panicked after reporting");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    struct ChannelRequest {
        source: SourceId,
        answer: mpsc::Receiver<String>,
    }

    impl InputRequest for ChannelRequest {
        fn source(&self) -> SourceId {
            self.source
        }

        fn get_input(&mut self) -> Result<String> {
            self.answer.recv().context("answer channel closed")
        }
    }

    fn request() -> (SourceId, mpsc::Sender<String>, Box<dyn InputRequest>) {
        let source = SourceId::fresh();
        let (tx, rx) = mpsc::channel();
        (source, tx, Box::new(ChannelRequest { source, answer: rx }))
    }

    #[test]
    fn concurrent_error_lists_sources() {
        let a = SourceId::fresh();
        let b = SourceId::fresh();
        let err = ConcurrentInputError { sources: vec![a, b] };
        let text = err.to_string();
        assert!(text.starts_with("Can't run multiple input threads at the same time!"));
        assert!(text.contains(&format!("Input handler: {a}")));
        assert!(text.contains(&format!("Input handler: {b}")));
    }

    #[test]
    fn first_request_becomes_active() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let (source, tx, req) = request();

        let id = coordinator.start_input_thread(&main_loop, req, true).unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Active(id));
        assert_eq!(coordinator.pending_sources(), vec![source]);

        tx.send("hello".into()).unwrap();
        main_loop.process_signals(Some(SignalKind::InputReady)).unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert!(coordinator.pending_sources().is_empty());
    }

    #[test]
    fn sequential_requests_are_served_in_turn() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let ready = Rc::new(RefCell::new(Vec::new()));
        main_loop.register_signal_handler(
            SignalKind::InputReady,
            |_, signal, ready: &Rc<RefCell<Vec<String>>>| {
                ready.borrow_mut().push(signal.text().unwrap_or_default().to_string());
                Ok(Flow::Continue)
            },
            Rc::clone(&ready),
        );

        for answer in ["one", "two"] {
            let (_, tx, req) = request();
            coordinator.start_input_thread(&main_loop, req, true).unwrap();
            tx.send(answer.into()).unwrap();
            main_loop.process_signals(Some(SignalKind::InputReady)).unwrap();
        }

        main_loop.process_signals(None).unwrap();
        assert_eq!(*ready.borrow(), vec!["one", "two"]);
    }
}
