//! Yes/no questions, injectable so cleanup can run unattended and in tests.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};

pub trait Confirm {
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Asks on stderr and reads the answer from stdin. Anything but `y`/`yes` is no.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        let stdin = io::stdin();
        ask(&mut stdin.lock(), &mut io::stderr(), question)
    }
}

/// Fixed answer, for `--yes` and non-interactive runs.
pub struct Always(pub bool);

impl Confirm for Always {
    fn confirm(&mut self, _question: &str) -> Result<bool> {
        Ok(self.0)
    }
}

fn ask(input: &mut impl BufRead, output: &mut impl Write, question: &str) -> Result<bool> {
    write!(output, "\n{question} [y/N] ")?;
    output.flush()?;

    let mut line = String::new();
    // EOF counts as no
    input.read_line(&mut line).context("reading answer")?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Offer to delete the corpus. Returns whether it was removed.
pub fn offer_cleanup(path: &Path, confirm: &mut dyn Confirm) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    if !confirm.confirm(&format!("Delete generated file {}?", path.display()))? {
        return Ok(false);
    }
    std::fs::remove_file(path).with_context(|| format!("deleting {}", path.display()))?;
    Ok(true)
}
