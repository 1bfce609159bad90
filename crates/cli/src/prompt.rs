use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use stagehand_engine::Prompter;
use stagehand_types::{FailureDecision, StepOutcome};

/// Asks on the terminal whether to keep going after a `prompt` failure. Anything but yes aborts.
pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn decide(&self, outcome: &StepOutcome) -> FailureDecision {
        let kind = outcome.failure.map(|kind| kind.to_string()).unwrap_or_else(|| "failure".to_string());
        let question = format!("step '{}' failed ({kind}). Continue anyway? [y/N] ", outcome.step);
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stderr = io::stderr();
            stderr.write_all(question.as_bytes())?;
            stderr.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => parse_answer(&line),
            _ => FailureDecision::Abort,
        }
    }
}

fn parse_answer(line: &str) -> FailureDecision {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => FailureDecision::Continue,
        _ => FailureDecision::Abort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_yes_continues() {
        assert_eq!(parse_answer("y\n"), FailureDecision::Continue);
        assert_eq!(parse_answer(" YES "), FailureDecision::Continue);
        assert_eq!(parse_answer("\n"), FailureDecision::Abort);
        assert_eq!(parse_answer("nope"), FailureDecision::Abort);
    }
}
