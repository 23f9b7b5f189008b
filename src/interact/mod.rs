//! Operator interaction
//!
//! Prompts, the role -> resource cache, interactive resource resolution and
//! the command console behind every tool's `--interactive` flag.

pub mod cache;
pub mod console;
pub mod handlers;
pub mod prompt;
pub mod resolve;

pub use cache::ResourceCache;
pub use console::{CommandOutcome, Console, ConsoleHandler};
pub use prompt::{LineSource, Prompt, Prompter, TerminalInput};
pub use resolve::{resolve_resource, ResolveOptions};
