//! Background user-input acquisition.
//!
//! - `coordinator`: serializes input worker threads for a loop
//! - `handler`: per-requester helper with blocking-wait and callback styles

pub mod coordinator;
pub mod handler;

pub use coordinator::{ConcurrentInputError, CoordinatorState, InputCoordinator, InputRequest};
pub use handler::{InputHandler, InputReader, PromptRequest, read_line_from_stdin};
