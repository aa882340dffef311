use std::io::{BufRead, Write};

use crate::error::Result;

/// Asks the user to confirm an irreversible step.
pub trait Confirm {
    /// `true` only on an explicit yes. Empty input counts as no.
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// `[y/N]` prompt on a terminal-like reader and writer.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for TerminalPrompt<R, W> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            write!(self.output, "{question} [y/N] ")?;
            self.output.flush()?;

            let mut answer = String::new();
            if self.input.read_line(&mut answer)? == 0 {
                // EOF
                writeln!(self.output)?;
                return Ok(false);
            }

            match answer.trim().to_lowercase().as_str() {
                "" | "n" | "no" => return Ok(false),
                "y" | "ye" | "yes" => return Ok(true),
                _ => writeln!(self.output, "Please respond with 'yes' or 'no' (or 'y' or 'n').")?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ask(input: &str) -> (bool, String) {
        let mut output = Vec::new();
        let answer = TerminalPrompt::new(Cursor::new(input.to_string()), &mut output)
            .confirm("Continue?")
            .unwrap();
        (answer, String::from_utf8(output).unwrap())
    }

    #[test]
    fn empty_answer_is_no() {
        assert!(!ask("\n").0);
        assert!(!ask("").0);
    }

    #[test]
    fn accepts_yes_variants() {
        for answer in ["y\n", "Y\n", "ye\n", "YES\n"] {
            assert!(ask(answer).0, "{answer:?}");
        }
        assert!(!ask("n\n").0);
        assert!(!ask("No\n").0);
    }

    #[test]
    fn asks_again_on_unknown_answer() {
        let (answer, output) = ask("maybe\ny\n");
        assert!(answer);
        assert_eq!(output.matches("Continue? [y/N]").count(), 2);
        assert!(output.contains("Please respond with 'yes' or 'no'"));
    }
}
