//! Interactive operator input.
//!
//! Reads answers line by line from any `BufRead` so the flows can be driven
//! from a script in tests. Closed input is an error, never an endless loop.

use engine::{parse_worker_count, Selection, DEFAULT_WORKERS};
use std::io::{BufRead, Write};

pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Prompter { input, output }
    }

    /// Print one line of output.
    pub fn say(&mut self, line: &str) -> Result<(), String> {
        writeln!(self.output, "{}", line).map_err(|e| format!("Failed to write to console: {}", e))
    }

    /// Print `question` and read one trimmed answer.
    pub fn ask(&mut self, question: &str) -> Result<String, String> {
        write!(self.output, "{}", question).map_err(|e| format!("Failed to write to console: {}", e))?;
        self.output
            .flush()
            .map_err(|e| format!("Failed to write to console: {}", e))?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .map_err(|e| format!("Failed to read input: {}", e))?;
        if read == 0 {
            return Err("Input closed before an answer was given".to_string());
        }
        Ok(line.trim().to_string())
    }

    /// Ask until the answer is not empty.
    pub fn ask_non_empty(&mut self, question: &str) -> Result<String, String> {
        loop {
            let answer = self.ask(question)?;
            if !answer.is_empty() {
                return Ok(answer);
            }
        }
    }

    /// Yes/no question; only "y" or "yes" count as yes.
    pub fn confirm(&mut self, question: &str) -> Result<bool, String> {
        let answer = self.ask(question)?.to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    /// Ask for the worker count. Unusable answers fall back to the default
    /// with a warning.
    pub fn ask_workers(&mut self) -> Result<usize, String> {
        let answer = self.ask(&format!(
            "How many download workers? [Enter for {}] (more workers = more speed, more server load): ",
            DEFAULT_WORKERS
        ))?;
        let (workers, warning) = parse_worker_count(&answer);
        if let Some(warning) = warning {
            self.say(&format!("Warning: {}", warning))?;
        }
        Ok(workers)
    }

    /// Show the numbered folder list and ask until the selection is valid.
    pub fn ask_selection(&mut self, available: &[String]) -> Result<Selection, String> {
        self.say("")?;
        self.say("--- Available folders for backup ---")?;
        for (i, name) in available.iter().enumerate() {
            self.say(&format!("  [{}] {}", i + 1, name))?;
        }
        self.say("------------------------------------")?;

        loop {
            let answer = self.ask("Enter folder numbers (comma-separated), or 'all': ")?;
            match Selection::parse(&answer, available) {
                Ok(selection) => return Ok(selection),
                Err(e) => self.say(&format!("Invalid input: {}", e))?,
            }
        }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}
