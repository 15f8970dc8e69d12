//! Async composition kernel (component H): lazy tasks, combinators, stop
//! tokens, and a spawn/join bridge.

pub mod emitter;
pub mod task;

pub use emitter::{detach, just, let_value, then, tie, timeout, StopSource, StopToken, Task, FORWARD_ERRORS};
pub use task::{spawn, JoinedTask};
