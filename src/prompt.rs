// src/prompt.rs

//! Operator confirmation
//!
//! Recovery steps that deserve a human look (license diffs, patch removal)
//! ask through a [`Prompter`]. [`TerminalPrompter`] blocks on stdin;
//! [`AutoPrompter`] takes the default answer so unattended runs never stop.

use crate::error::Result;
use std::io::{self, BufRead, Write};
use tracing::info;

/// Source of yes/no decisions during an upgrade
pub trait Prompter {
    /// Ask a yes/no question, returning `default` on an empty answer
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;

    /// Present a block of text, such as a diff
    fn show(&self, title: &str, body: &str) -> Result<()>;
}

/// Interactive prompts on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

/// Interpret an answer line; `None` means the answer was not understood
fn parse_answer(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            write!(stdout, "{} {} ", question, hint)?;
            stdout.flush()?;

            let mut answer = String::new();
            if stdin.lock().read_line(&mut answer)? == 0 {
                // EOF: nobody is there to answer
                return Ok(default);
            }
            if let Some(decision) = parse_answer(&answer, default) {
                return Ok(decision);
            }
            writeln!(stdout, "Please answer 'y' or 'n'.")?;
        }
    }

    fn show(&self, title: &str, body: &str) -> Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "################ {} ################", title)?;
        write!(stdout, "{}", body)?;
        if !body.ends_with('\n') {
            writeln!(stdout)?;
        }
        writeln!(stdout, "####################################################")?;
        Ok(())
    }
}

/// Unattended mode: every question takes its default answer
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoPrompter;

impl Prompter for AutoPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        info!("{} -> {}", question, if default { "yes" } else { "no" });
        Ok(default)
    }

    fn show(&self, _title: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}
