//! Interactive prompts for the provisioning commands.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::io::{self, BufRead, StdinLock, Stdout, Write};

pub trait Prompt {
    /// Print `label` and read one line, without the trailing newline.
    ///
    /// # Errors
    /// Returns an error if the input is closed or unreadable.
    fn line(&mut self, label: &str) -> Result<String>;

    /// Read a value that must not be logged or kept as a plain `String`.
    ///
    /// # Errors
    /// Returns an error if the input is closed or unreadable.
    fn secret(&mut self, label: &str) -> Result<SecretString> {
        self.line(label).map(SecretString::from)
    }
}

/// Line based prompt over any reader and writer.
pub struct LinePrompt<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl LinePrompt<StdinLock<'static>, Stdout> {
    /// Prompt on the terminal. Input is echoed.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompt for LinePrompt<R, W> {
    fn line(&mut self, label: &str) -> Result<String> {
        write!(self.writer, "{label}").context("failed to write prompt")?;
        self.writer.flush().context("failed to flush prompt")?;

        let mut input = String::new();
        let read = self
            .reader
            .read_line(&mut input)
            .context("failed to read input")?;
        if read == 0 {
            bail!("input closed before {} was answered", label.trim_end());
        }
        Ok(input.trim_end_matches(['\r', '\n']).to_string())
    }
}
