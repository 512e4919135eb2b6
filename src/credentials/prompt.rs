//! Operator prompts used by the association flow.
//!
//! The [`Prompter`] trait abstracts terminal input so the resolver can be
//! driven by mocks in tests. [`TerminalPrompter`] is the real implementation:
//! visible answers are read line by line from stdin, secrets are read key by
//! key in raw mode without echo.

use std::io::{self, IsTerminal};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};
use log::debug;
use mockall::automock;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin},
    sync::Mutex,
};

use crate::error::PuppetError;

/// Asks the operator for values missing from the configuration.
#[automock]
pub trait Prompter {
    /// Asks a question and returns the answer typed by the operator.
    async fn ask(&self, question: &str) -> Result<String, PuppetError>;
    /// Asks for a secret, the answer is not echoed.
    async fn ask_secret(&self, question: &str) -> Result<String, PuppetError>;
}

/// [`Prompter`] reading from the process terminal.
pub struct TerminalPrompter {
    /// Shared reader so that buffered input survives between prompts
    stdin: Mutex<BufReader<Stdin>>,
}

impl TerminalPrompter {
    /// Creates a prompter bound to the process stdin/stdout.
    pub fn new() -> Self {
        TerminalPrompter {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    /// Writes the question without a trailing newline.
    async fn print_question(question: &str) -> io::Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await?;
        stdout.flush().await
    }

    /// Reads one line, failing with `UnexpectedEof` when stdin is closed.
    async fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        let read = self.stdin.lock().await.read_line(&mut line).await?;
        if read == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        Ok(trim_line_ending(line))
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    async fn ask(&self, question: &str) -> Result<String, PuppetError> {
        Self::print_question(question).await?;
        Ok(self.read_line().await?)
    }

    async fn ask_secret(&self, question: &str) -> Result<String, PuppetError> {
        Self::print_question(question).await?;

        // Piped input cannot be masked, read it as a plain line
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal, reading secret as a plain line");
            return Ok(self.read_line().await?);
        }

        let secret = tokio::task::spawn_blocking(read_masked)
            .await
            .map_err(io::Error::other)??;
        Ok(secret)
    }
}

/// Reads a secret in raw mode, restoring the terminal afterwards.
fn read_masked() -> io::Result<String> {
    terminal::enable_raw_mode()?;
    let secret = read_masked_keys();
    terminal::disable_raw_mode()?;
    println!();
    secret
}

fn read_masked_keys() -> io::Result<String> {
    let mut secret = String::new();
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };

        if kind == KeyEventKind::Release {
            continue;
        }

        match code {
            KeyCode::Enter => return Ok(secret),
            KeyCode::Backspace => {
                secret.pop();
            }
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            KeyCode::Char(c) => secret.push(c),
            _ => {}
        }
    }
}

/// Removes the `\n` or `\r\n` terminating a line read from stdin.
fn trim_line_ending(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}
