//! Operator prompts
//!
//! Yes/no questions, numbered option lists and "press enter" pauses. The
//! [`Prompt`] trait lets instrument code ask the operator without knowing
//! whether it is talking to a terminal or to a scripted test input.
//!
//! Reads are async so a tool waiting on the operator can still be
//! interrupted: the terminal is read on a dedicated thread and lines are
//! handed over through a channel, which keeps a pending read cancellable.

use std::io::{self, BufRead, Cursor, Stdout, Write};
use std::thread;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{AppResult, ToolsError};

/// Something that can ask the operator questions
#[async_trait]
pub trait Prompt: Send {
    /// Print one line of information
    fn message(&mut self, text: &str) -> AppResult<()>;

    /// Print `prompt` (no newline) and read one line, without its terminator
    async fn ask(&mut self, prompt: &str) -> AppResult<String>;

    /// Ask a yes/no question until a valid answer is given.
    ///
    /// An empty answer returns `default` when there is one.
    async fn confirm(&mut self, question: &str, default: Option<bool>) -> AppResult<bool> {
        self.message(question)?;
        let prompt = match default {
            Some(true) => "> [Y/n]",
            Some(false) => "> [y/N]",
            None => "> ",
        };
        loop {
            let answer = self.ask(prompt).await?.trim().to_lowercase();
            match (answer.as_str(), default) {
                ("", Some(default)) => return Ok(default),
                ("y" | "yes", _) => return Ok(true),
                ("n" | "no", _) => return Ok(false),
                _ => self.message(&format!(
                    "Invalid Input: '{}'. Type any of y,yes,n,no",
                    answer
                ))?,
            }
        }
    }

    /// Show `options` numbered from 0 and read a choice.
    ///
    /// With a `default` label, an empty reply returns `Ok(None)`; without one
    /// the question repeats until an index in range is given.
    async fn option_list(
        &mut self,
        options: &[String],
        prompt: &str,
        default: Option<&str>,
    ) -> AppResult<Option<usize>> {
        loop {
            self.message(prompt)?;
            for (i, option) in options.iter().enumerate() {
                self.message(&format!("{}) {}", i, option))?;
            }
            let input_prompt = match default {
                Some(label) => format!("(default '{}') > ", label),
                None => "> ".to_string(),
            };
            let reply = self.ask(&input_prompt).await?;
            let reply = reply.trim();
            if reply.is_empty() && default.is_some() {
                return Ok(None);
            }
            match reply.parse::<usize>() {
                Ok(idx) if idx < options.len() => return Ok(Some(idx)),
                _ => self.message(&format!(
                    "Invalid answer: {}. Choose a value from 0-{}.",
                    reply,
                    options.len() as i64 - 1
                ))?,
            }
        }
    }

    /// Print `message` and wait until the operator presses enter
    async fn wait_for_enter(&mut self, message: &str) -> AppResult<()> {
        self.message(message)?;
        self.ask("> ").await.map(|_| ())
    }
}

/// Source of operator input lines
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, `None` at end of input
    async fn next_line(&mut self) -> AppResult<Option<String>>;
}

#[async_trait]
impl<T> LineSource for Cursor<T>
where
    T: AsRef<[u8]> + Send,
{
    async fn next_line(&mut self) -> AppResult<Option<String>> {
        let mut line = String::new();
        if self.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Lines typed on the process terminal.
///
/// The reader thread starts on the first read and is never joined; it ends
/// with the process.
#[derive(Debug, Default)]
pub struct TerminalInput {
    lines: Option<mpsc::UnboundedReceiver<io::Result<String>>>,
}

impl TerminalInput {
    fn receiver(&mut self) -> AppResult<&mut mpsc::UnboundedReceiver<io::Result<String>>> {
        if self.lines.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            thread::Builder::new()
                .name("terminal-input".into())
                .spawn(move || {
                    for line in io::stdin().lock().lines() {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                })?;
            self.lines = Some(rx);
        }
        self.lines.as_mut().ok_or(ToolsError::Cancelled)
    }
}

#[async_trait]
impl LineSource for TerminalInput {
    async fn next_line(&mut self) -> AppResult<Option<String>> {
        match self.receiver()?.recv().await {
            Some(Ok(line)) => Ok(Some(line.trim_end_matches('\r').to_string())),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

/// [`Prompt`] over any line source and writer
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: LineSource, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Consume the prompter, returning its output sink
    pub fn into_output(self) -> W {
        self.output
    }
}

impl Prompter<TerminalInput, Stdout> {
    /// Prompter on the process terminal
    pub fn stdio() -> Self {
        Self::new(TerminalInput::default(), io::stdout())
    }
}

#[async_trait]
impl<R, W> Prompt for Prompter<R, W>
where
    R: LineSource,
    W: Write + Send,
{
    fn message(&mut self, text: &str) -> AppResult<()> {
        writeln!(self.output, "{}", text)?;
        Ok(())
    }

    async fn ask(&mut self, prompt: &str) -> AppResult<String> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        self.input.next_line().await?.ok_or(ToolsError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn output(p: Prompter<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(p.into_output()).unwrap()
    }

    #[tokio::test]
    async fn test_confirm_default_on_empty() {
        let mut p = prompter("\n");
        assert!(p.confirm("Continue?", Some(true)).await.unwrap());
        let text = output(p);
        assert!(text.starts_with("Continue?\n> [Y/n]"));

        let mut p = prompter("\n");
        assert!(!p.confirm("Continue?", Some(false)).await.unwrap());
        assert!(output(p).contains("> [y/N]"));
    }

    #[tokio::test]
    async fn test_confirm_reasks_on_invalid_input() {
        let mut p = prompter("maybe\nYES\n");
        assert!(p.confirm("Continue?", Some(false)).await.unwrap());
        assert!(output(p).contains("Invalid Input: 'maybe'. Type any of y,yes,n,no"));
    }

    #[tokio::test]
    async fn test_confirm_without_default_requires_answer() {
        let mut p = prompter("\nn\n");
        assert!(!p.confirm("Continue?", None).await.unwrap());
        assert!(output(p).contains("Invalid Input: ''"));
    }

    #[tokio::test]
    async fn test_option_list() {
        let options = vec!["a".to_string(), "b".to_string()];
        let mut p = prompter("5\nx\n1\n");
        assert_eq!(p.option_list(&options, "Pick:", None).await.unwrap(), Some(1));
        let text = output(p);
        assert!(text.contains("0) a\n1) b\n"));
        assert!(text.contains("Invalid answer: 5. Choose a value from 0-1."));
        assert!(text.contains("Invalid answer: x. Choose a value from 0-1."));
    }

    #[tokio::test]
    async fn test_option_list_default() {
        let options = vec!["a".to_string(), "b".to_string()];
        let mut p = prompter("\n");
        assert_eq!(p.option_list(&options, "Pick:", Some("")).await.unwrap(), None);
        assert!(output(p).contains("(default '') > "));
    }

    #[tokio::test]
    async fn test_end_of_input_cancels() {
        let mut p = prompter("");
        assert!(matches!(
            p.confirm("Continue?", Some(true)).await,
            Err(ToolsError::Cancelled)
        ));
        let mut p = prompter("");
        assert!(matches!(
            p.wait_for_enter("Unplug").await,
            Err(ToolsError::Cancelled)
        ));
    }
}
