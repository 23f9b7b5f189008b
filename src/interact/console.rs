//! Interactive command console
//!
//! Every tool's `--interactive` flag drops into a small line-oriented loop
//! over the instrument it just configured. The loop itself only knows `help`
//! and `quit`/`exit`; everything else is passed to a [`ConsoleHandler`].

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AppResult, ToolsError};
use crate::interact::Prompt;

/// What a handler did with a command line
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Handled, print this
    Output(String),
    /// Handled, nothing to print
    Done,
    /// Not a command this handler knows
    Unknown,
}

/// Instrument-specific commands for the [`Console`]
#[async_trait]
pub trait ConsoleHandler: Send {
    /// Shown in the input prompt
    fn name(&self) -> &str;

    /// `(usage, description)` pairs for `help`
    fn help(&self) -> Vec<(&'static str, &'static str)>;

    /// Run `command` with whitespace-split `args`
    async fn handle(&mut self, command: &str, args: &[&str]) -> AppResult<CommandOutcome>;
}

/// Line loop dispatching to a [`ConsoleHandler`]
#[derive(Debug, Default)]
pub struct Console {
    executed: usize,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands handled so far, including failed ones
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Read and run commands until `quit`, `exit` or end of input.
    ///
    /// Command errors are printed and the loop carries on.
    pub async fn run(
        &mut self,
        prompt: &mut dyn Prompt,
        handler: &mut dyn ConsoleHandler,
    ) -> AppResult<()> {
        prompt.message(&format!(
            "Interactive mode on {}. Type 'help' for commands, 'quit' to leave.",
            handler.name()
        ))?;
        let input_prompt = format!("{}> ", handler.name());
        loop {
            let line = match prompt.ask(&input_prompt).await {
                Ok(line) => line,
                Err(ToolsError::Cancelled) => break,
                Err(e) => return Err(e),
            };
            let mut words = line.split_whitespace();
            let Some(command) = words.next() else {
                continue;
            };
            let args: Vec<&str> = words.collect();

            match command {
                "quit" | "exit" => break,
                "help" => print_help(prompt, handler)?,
                _ => {
                    self.executed += 1;
                    debug!("console: {} {:?}", command, args);
                    match handler.handle(command, &args).await {
                        Ok(CommandOutcome::Output(text)) => prompt.message(&text)?,
                        Ok(CommandOutcome::Done) => {}
                        Ok(CommandOutcome::Unknown) => prompt.message(&format!(
                            "Unknown command '{}'. Type 'help' for commands.",
                            command
                        ))?,
                        Err(e) => prompt.message(&format!("Error: {}", e))?,
                    }
                }
            }
        }
        Ok(())
    }
}

fn print_help(prompt: &mut dyn Prompt, handler: &dyn ConsoleHandler) -> AppResult<()> {
    let mut entries = handler.help();
    entries.push(("help", "show this list"));
    entries.push(("quit | exit", "leave interactive mode"));
    let width = entries.iter().map(|(usage, _)| usage.len()).max().unwrap_or(0);
    for (usage, description) in entries {
        prompt.message(&format!("  {:width$}  {}", usage, description, width = width))?;
    }
    Ok(())
}

/// Parse the single numeric argument of `command`
pub(crate) fn number_arg(command: &str, args: &[&str]) -> AppResult<f64> {
    match args {
        [value] => value.parse::<f64>().map_err(|_| {
            ToolsError::OutOfRange(format!("{}: '{}' is not a number", command, value))
        }),
        _ => Err(ToolsError::OutOfRange(format!(
            "{} takes exactly one number",
            command
        ))),
    }
}
