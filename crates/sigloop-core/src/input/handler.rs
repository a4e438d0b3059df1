//! Per-requester input helper built on the coordinator.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use anyhow::{Context, Result};

use super::coordinator::{InputCoordinator, InputRequest};
use crate::event_loop::signal::{RequestId, SignalKind, SourceId};
use crate::event_loop::{Flow, HandlerId, MainLoop};

/// Blocking read used by a [`PromptRequest`]; receives the prompt text.
pub type InputReader = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Writes `prompt` to stdout and reads one line from stdin.
///
/// End of input yields an empty string.
///
/// # Errors
/// Fails when stdout or stdin can't be used.
pub fn read_line_from_stdin(prompt: &str) -> Result<String> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "{prompt}").context("failed to write prompt")?;
    stdout.flush().context("failed to flush prompt")?;
    drop(stdout);

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Request that asks with a prompt and reads through an [`InputReader`].
pub struct PromptRequest {
    source: SourceId,
    prompt: String,
    reader: InputReader,
}

impl PromptRequest {
    pub fn new(source: SourceId, prompt: impl Into<String>, reader: InputReader) -> Self {
        Self {
            source,
            prompt: prompt.into(),
            reader,
        }
    }

    /// Request reading a line from the terminal.
    pub fn stdin(source: SourceId, prompt: impl Into<String>) -> Self {
        Self::new(source, prompt, Arc::new(read_line_from_stdin))
    }
}

impl fmt::Debug for PromptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptRequest")
            .field("source", &self.source)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

impl InputRequest for PromptRequest {
    fn source(&self) -> SourceId {
        self.source
    }

    fn get_input(&mut self) -> Result<String> {
        (self.reader)(&self.prompt)
    }
}

struct HandlerState {
    source: SourceId,
    value: RefCell<Option<String>>,
    received: Cell<bool>,
    callback: RefCell<Option<Box<dyn FnOnce(&str)>>>,
}

/// Asks for input without blocking the loop thread.
///
/// `get_input` starts the request; the answer arrives as an `InputReady`
/// signal addressed to this handler's source. Use `wait_on_input` to block
/// logically (signals keep flowing) or `set_callback` to be notified.
///
/// Creating a handler registers an `InputReady` handler on the loop. It
/// stays registered after the `InputHandler` is dropped (as a no-op) until
/// [`InputHandler::release`] removes it.
pub struct InputHandler {
    state: Rc<HandlerState>,
    registration: HandlerId,
    coordinator: InputCoordinator,
    skip_concurrency_check: Cell<bool>,
    reader: RefCell<InputReader>,
}

impl fmt::Debug for InputHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputHandler")
            .field("source", &self.state.source)
            .field("received", &self.state.received.get())
            .finish_non_exhaustive()
    }
}

impl InputHandler {
    pub fn new(main_loop: &MainLoop, coordinator: &InputCoordinator) -> Self {
        let state = Rc::new(HandlerState {
            source: SourceId::fresh(),
            value: RefCell::new(None),
            received: Cell::new(false),
            callback: RefCell::new(None),
        });

        let registration = main_loop.register_signal_handler(
            SignalKind::InputReady,
            |_, signal, state: &Weak<HandlerState>| {
                let Some(state) = state.upgrade() else {
                    return Ok(Flow::Continue);
                };
                if signal.source() != Some(state.source) {
                    return Ok(Flow::Continue);
                }

                let value = signal.text().unwrap_or_default().to_string();
                state.received.set(true);
                *state.value.borrow_mut() = Some(value.clone());

                let callback = state.callback.borrow_mut().take();
                if let Some(callback) = callback {
                    callback(&value);
                }
                Ok(Flow::Continue)
            },
            Rc::downgrade(&state),
        );

        Self {
            state,
            registration,
            coordinator: coordinator.clone(),
            skip_concurrency_check: Cell::new(!coordinator.concurrent_check()),
            reader: RefCell::new(Arc::new(read_line_from_stdin)),
        }
    }

    pub fn source(&self) -> SourceId {
        self.state.source
    }

    /// Removes this handler's `InputReady` registration from `main_loop`.
    /// Input for this source arriving later is ignored.
    pub fn release(&self, main_loop: &MainLoop) {
        main_loop.remove_signal_handler(SignalKind::InputReady, self.registration);
    }

    /// Last received input, if any.
    pub fn value(&self) -> Option<String> {
        self.state.value.borrow().clone()
    }

    pub fn input_received(&self) -> bool {
        self.state.received.get()
    }

    pub fn skip_concurrency_check(&self) -> bool {
        self.skip_concurrency_check.get()
    }

    /// Allows this handler to ask while another request is pending.
    pub fn set_skip_concurrency_check(&self, skip: bool) {
        self.skip_concurrency_check.set(skip);
    }

    /// Callback invoked once with the next received input.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnOnce(&str) + 'static,
    {
        *self.state.callback.borrow_mut() = Some(Box::new(callback));
    }

    /// Replaces the blocking read (e.g. with a password reader).
    pub fn set_reader(&self, reader: InputReader) {
        *self.reader.borrow_mut() = reader;
    }

    /// Clears the previous answer and starts asking with `prompt`.
    ///
    /// # Errors
    /// Fails when the coordinator rejects the request.
    pub fn get_input(&self, main_loop: &MainLoop, prompt: impl Into<String>) -> Result<RequestId> {
        self.state.received.set(false);
        self.state.value.borrow_mut().take();

        let reader = Arc::clone(&self.reader.borrow());
        let request = PromptRequest::new(self.state.source, prompt, reader);
        self.coordinator.start_input_thread(
            main_loop,
            Box::new(request),
            !self.skip_concurrency_check.get(),
        )
    }

    /// Dispatches signals until this handler's input arrives.
    ///
    /// Returns early with the flow of any handler that ends a loop level.
    ///
    /// # Errors
    /// Propagates errors raised while dispatching.
    pub fn wait_on_input(&self, main_loop: &MainLoop) -> Result<Flow> {
        while !self.state.received.get() {
            let flow = main_loop.process_signals(Some(SignalKind::InputReady))?;
            if !flow.is_continue() {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, mpsc};

    use super::*;
    use crate::event_loop::signal::Signal;
    use crate::input::coordinator::{ConcurrentInputError, CoordinatorState};

    fn fixed(answer: &'static str) -> InputReader {
        Arc::new(move |_prompt: &str| Ok(answer.to_string()))
    }

    /// Reader that blocks until the test sends an answer.
    fn gated() -> (mpsc::Sender<String>, InputReader) {
        let (tx, rx) = mpsc::channel::<String>();
        let rx = Mutex::new(rx);
        let reader: InputReader = Arc::new(move |_prompt: &str| {
            rx.lock().unwrap().recv().context("answer channel closed")
        });
        (tx, reader)
    }

    #[test]
    fn wait_on_input_returns_value() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let handler = InputHandler::new(&main_loop, &coordinator);
        handler.set_reader(fixed("secret"));

        handler.get_input(&main_loop, "Password: ").unwrap();
        let flow = handler.wait_on_input(&main_loop).unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(handler.input_received());
        assert_eq!(handler.value().as_deref(), Some("secret"));
    }

    #[test]
    fn prompt_is_passed_to_reader() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let handler = InputHandler::new(&main_loop, &coordinator);
        handler.set_reader(Arc::new(|prompt: &str| Ok(format!("echo:{prompt}"))));

        handler.get_input(&main_loop, "name?").unwrap();
        handler.wait_on_input(&main_loop).unwrap();
        assert_eq!(handler.value().as_deref(), Some("echo:name?"));
    }

    #[test]
    fn callback_fires_once() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let handler = InputHandler::new(&main_loop, &coordinator);
        handler.set_reader(fixed("yes"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        handler.set_callback(move |value| sink.borrow_mut().push(value.to_string()));

        handler.get_input(&main_loop, "").unwrap();
        handler.wait_on_input(&main_loop).unwrap();
        handler.get_input(&main_loop, "").unwrap();
        handler.wait_on_input(&main_loop).unwrap();

        assert_eq!(*seen.borrow(), vec!["yes"]);
    }

    #[test]
    fn ignores_input_for_other_sources() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let handler = InputHandler::new(&main_loop, &coordinator);

        main_loop.enqueue_signal(Signal::input_ready(SourceId::fresh(), "stray".into()));
        main_loop.process_signals(None).unwrap();

        assert!(!handler.input_received());
        assert_eq!(handler.value(), None);
    }

    #[test]
    fn reader_failure_surfaces_as_error() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let handler = InputHandler::new(&main_loop, &coordinator);
        handler.set_reader(Arc::new(|_: &str| -> Result<String> {
            anyhow::bail!("terminal closed")
        }));

        handler.get_input(&main_loop, "> ").unwrap();
        let err = handler.wait_on_input(&main_loop).unwrap_err();
        assert_eq!(err.to_string(), "terminal closed");
    }

    #[test]
    fn strict_handler_rejects_input_while_another_is_pending() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let first = InputHandler::new(&main_loop, &coordinator);
        let second = InputHandler::new(&main_loop, &coordinator);
        assert!(!second.skip_concurrency_check());

        let (answer, reader) = gated();
        first.set_reader(reader);
        let first_id = first.get_input(&main_loop, "first? ").unwrap();

        let err = second.get_input(&main_loop, "second? ").unwrap_err();
        let concurrent = err.downcast_ref::<ConcurrentInputError>().unwrap();
        assert_eq!(concurrent.sources, vec![first.source(), second.source()]);
        assert_eq!(coordinator.state(), CoordinatorState::Active(first_id));

        answer.send("one".into()).unwrap();
        first.wait_on_input(&main_loop).unwrap();
        assert_eq!(first.value().as_deref(), Some("one"));
        assert!(!second.input_received());
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[test]
    fn skipping_check_defers_input_until_pending_one_answers() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let first = InputHandler::new(&main_loop, &coordinator);
        let second = InputHandler::new(&main_loop, &coordinator);
        second.set_skip_concurrency_check(true);
        assert!(second.skip_concurrency_check());

        let (answer, reader) = gated();
        first.set_reader(reader);
        second.set_reader(fixed("two"));
        let first_id = first.get_input(&main_loop, "first? ").unwrap();
        second.get_input(&main_loop, "second? ").unwrap();

        assert_eq!(coordinator.state(), CoordinatorState::Active(first_id));
        assert_eq!(
            coordinator.pending_sources(),
            vec![first.source(), second.source()]
        );

        answer.send("one".into()).unwrap();
        second.wait_on_input(&main_loop).unwrap();

        assert_eq!(first.value().as_deref(), Some("one"));
        assert_eq!(second.value().as_deref(), Some("two"));
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[test]
    fn released_handler_ignores_its_input() {
        let main_loop = MainLoop::new();
        let coordinator = InputCoordinator::default();
        let handler = InputHandler::new(&main_loop, &coordinator);

        handler.release(&main_loop);
        main_loop.enqueue_signal(Signal::input_ready(handler.source(), "late".into()));
        main_loop.process_signals(None).unwrap();

        assert!(!handler.input_received());
        assert_eq!(handler.value(), None);
    }
}
