//! Host seams.
//!
//! Rendering, prompting, clipboard and browser launch belong to whatever hosts
//! the client (an IDE, a terminal). The library talks to them only through
//! these traits; [`TerminalHost`] is the implementation used by the CLI.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

use crate::error::ApimError;
use crate::wizard::{Answer, PromptKind, PromptStep};

/// Answers a single prompt step. `Ok(None)` means the user dismissed the prompt.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn prompt(&self, step: &PromptStep) -> Result<Option<Answer>, ApimError>;

    /// Modal yes/no confirmation. Dismissing the prompt counts as "no".
    async fn confirm(&self, message: &str) -> Result<bool, ApimError> {
        let step = PromptStep::confirm("confirm", message);
        Ok(matches!(
            self.prompt(&step).await?,
            Some(Answer::Confirmed(true))
        ))
    }
}

/// Non-blocking user notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn info(&self, message: &str);
    async fn warn(&self, message: &str);
}

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<(), ApimError>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), ApimError>;
}

/// Everything a command flow needs from its host.
pub trait Host: Prompter + Notifier + Clipboard + Browser {}

impl<T> Host for T where T: Prompter + Notifier + Clipboard + Browser {}

/// Line-oriented host on stdin/stdout.
///
/// Clipboard writes and browser launches are printed for the user to act on.
pub struct TerminalHost {
    stdin: Mutex<BufReader<Stdin>>,
}

impl TerminalHost {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    async fn write(&self, text: &str) -> Result<(), ApimError> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(text.as_bytes())
            .await
            .map_err(|err| ApimError::Host(err.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|err| ApimError::Host(err.to_string()))
    }

    /// Reads one line; `None` on end of input.
    async fn read_line(&self) -> Result<Option<String>, ApimError> {
        let mut line = String::new();
        let read = self
            .stdin
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|err| ApimError::Host(err.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl Default for TerminalHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prompter for TerminalHost {
    async fn prompt(&self, step: &PromptStep) -> Result<Option<Answer>, ApimError> {
        match &step.kind {
            PromptKind::Input {
                prompt,
                default,
                password,
            } => {
                self.write(&input_line(prompt, default.as_deref(), *password))
                    .await?;
                Ok(self.read_line().await?.map(Answer::Text))
            }
            PromptKind::Pick {
                placeholder,
                options,
            } => {
                let mut menu = format!("{}\n", placeholder);
                for (index, option) in options.iter().enumerate() {
                    menu.push_str(&format!("  {:>2}) {}", index + 1, option.label));
                    if !option.description.is_empty() {
                        menu.push_str(&format!("  {}", option.description));
                    }
                    if !option.detail.is_empty() {
                        menu.push_str(&format!("  ({})", option.detail));
                    }
                    menu.push('\n');
                }
                loop {
                    self.write(&format!("{}> ", menu)).await?;
                    let Some(line) = self.read_line().await? else {
                        return Ok(None);
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        return Ok(None);
                    }
                    match line.parse::<usize>() {
                        Ok(choice) if (1..=options.len()).contains(&choice) => {
                            return Ok(Some(Answer::Picked(choice - 1)));
                        }
                        _ => {
                            if let Some(index) = options.iter().position(|o| o.label == line) {
                                return Ok(Some(Answer::Picked(index)));
                            }
                            self.write("Please pick one of the listed options.\n").await?;
                        }
                    }
                }
            }
            PromptKind::Confirm {
                message,
                accept_label,
            } => {
                self.write(&format!("{} Type '{}' to confirm: ", message, accept_label))
                    .await?;
                let answer = self.read_line().await?;
                Ok(Some(Answer::Confirmed(
                    answer.is_some_and(|line| line.trim().eq_ignore_ascii_case(accept_label)),
                )))
            }
        }
    }
}

/// Prompt line for free-text input. The terminal cannot hide what is typed, so
/// secret inputs say so, and their pre-filled value is never printed.
fn input_line(prompt: &str, default: Option<&str>, password: bool) -> String {
    if password {
        let kept = if default.is_some() { " [unchanged]" } else { "" };
        return format!("{} (input is visible){}: ", prompt, kept);
    }
    match default {
        Some(value) => format!("{} [{}]: ", prompt, value),
        None => format!("{}: ", prompt),
    }
}

#[async_trait]
impl Notifier for TerminalHost {
    async fn info(&self, message: &str) {
        let _ = self.write(&format!("{}\n", message)).await;
    }

    async fn warn(&self, message: &str) {
        let _ = self.write(&format!("warning: {}\n", message)).await;
    }
}

#[async_trait]
impl Clipboard for TerminalHost {
    async fn write_text(&self, text: &str) -> Result<(), ApimError> {
        self.write(&format!("{}\n", text)).await
    }
}

#[async_trait]
impl Browser for TerminalHost {
    async fn open(&self, url: &str) -> Result<(), ApimError> {
        self.write(&format!("Open the following link to continue:\n{}\n", url))
            .await
    }
}
