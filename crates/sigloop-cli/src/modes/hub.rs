//! Hub mode: a command prompt that opens a modal greeter level.
//!
//! The hub runs in the outermost loop level and asks for one command per
//! `show-hub` signal. `n` enters a nested level where the greeter asks for a
//! name; the hub resumes once the greeter leaves its level. `q`, empty input
//! or end of input leave the outermost level. Ctrl+C enqueues `quit` from the
//! signal handler thread.

use anyhow::{Context, Result};
use sigloop_core::config::Config;
use sigloop_core::{Flow, InputCoordinator, InputHandler, MainLoop, Signal, SignalKind};

const SHOW_HUB: SignalKind = SignalKind::Custom("show-hub");
const OPEN_GREETER: SignalKind = SignalKind::Custom("open-greeter");
const QUIT: SignalKind = SignalKind::Custom("quit");

/// Quit jumps ahead of anything already queued.
const QUIT_PRIORITY: i32 = -100;

const HUB_PROMPT: &str = "[n]ew greeting, [q]uit: ";
const GREETER_PROMPT: &str = "Name? ";

pub fn run(config: &Config) -> Result<()> {
    let main_loop = MainLoop::new();
    let coordinator = InputCoordinator::new(&config.input);

    let sender = main_loop.sender();
    ctrlc::set_handler(move || {
        sender.enqueue_signal(Signal::new(QUIT, None).with_priority(QUIT_PRIORITY));
    })
    .context("install Ctrl+C handler")?;

    main_loop.register_signal_handler(QUIT, |_, _, ()| Ok(Flow::EndProcess), ());
    main_loop.register_signal_handler(
        SHOW_HUB,
        |main_loop, _, hub: &InputHandler| show_hub(main_loop, hub),
        InputHandler::new(&main_loop, &coordinator),
    );
    main_loop.register_signal_handler(
        OPEN_GREETER,
        |main_loop, _, greeter: &InputHandler| greet(main_loop, greeter),
        InputHandler::new(&main_loop, &coordinator),
    );
    main_loop.set_quit_callback(|| println!("Bye."));

    main_loop.enqueue_signal(Signal::new(SHOW_HUB, None));
    main_loop.run()
}

fn show_hub(main_loop: &MainLoop, hub: &InputHandler) -> Result<Flow> {
    hub.get_input(main_loop, HUB_PROMPT)?;
    let flow = hub.wait_on_input(main_loop)?;
    if !flow.is_continue() {
        return Ok(flow);
    }

    let command = hub.value().unwrap_or_default();
    match command.trim() {
        "n" => {
            let flow = main_loop.enter_nested_loop(Signal::new(OPEN_GREETER, None))?;
            if !flow.is_continue() {
                return Ok(flow);
            }
        }
        "q" | "" => return main_loop.leave_nested_loop(),
        other => println!("Unknown command '{other}'"),
    }

    main_loop.enqueue_signal(Signal::new(SHOW_HUB, None));
    Ok(Flow::Continue)
}

fn greet(main_loop: &MainLoop, greeter: &InputHandler) -> Result<Flow> {
    main_loop.register_signal_source(greeter.source());
    tracing::debug!(depth = main_loop.depth(), "greeter opened");

    greeter.get_input(main_loop, GREETER_PROMPT)?;
    let flow = greeter.wait_on_input(main_loop)?;
    if !flow.is_continue() {
        return Ok(flow);
    }

    let name = greeter.value().unwrap_or_default();
    match name.trim() {
        "" => println!("Nobody to greet."),
        name => println!("Hello, {name}!"),
    }
    main_loop.leave_nested_loop()
}
