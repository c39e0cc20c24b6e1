//! The search loop: one pass over every center, repeated in continuous mode.

use std::io::{BufRead, Write};
use std::time::Duration;

use dtscan_scraper::{Engine, RunSummary, ScraperError};

use crate::report;

/// What to do with the browser once searching stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchEnd {
    Close,
    /// The user stopped after finding slots and wants to book in the open page.
    KeepOpen,
}

/// Sign in, pick centers, then scan them until done.
///
/// # Errors
///
/// Returns the first fatal scraper error, including
/// [`ScraperError::Cancelled`] when Ctrl-C was pressed.
pub(crate) async fn run(
    engine: &Engine,
    continuous: bool,
    pause: Duration,
) -> anyhow::Result<SearchEnd> {
    let centers = engine.start().await?;
    if centers.is_empty() {
        tracing::error!("No DriveTest centers match your preferences");
        return Ok(SearchEnd::Close);
    }
    tracing::info!(
        "Going to be searching these DriveTest centers: {}",
        report::describe_centers(&centers)
    );

    let mut found = RunSummary::default();
    loop {
        let mut stream = engine.run(centers.clone());
        while let Some(event) = stream.next().await {
            report::log_event(&event);
        }
        let outcome = stream.finish().await;
        for slot in outcome.summary.slots() {
            found.add(slot.clone());
        }
        outcome.result?;

        if found.is_empty() {
            tracing::error!("No timeslots found");
            if continuous {
                tracing::info!("Continuous searching on, searching again");
            }
        } else {
            report::print_summary(&found);
            if continuous && !confirm("Would you like to search for more time slots?").await? {
                return Ok(SearchEnd::KeepOpen);
            }
        }

        if !continuous {
            return Ok(SearchEnd::Close);
        }

        tracing::info!(
            "Pausing {} seconds to prevent overload of website",
            pause.as_secs()
        );
        let cancel = engine.cancellation_token();
        tokio::select! {
            () = cancel.cancelled() => return Err(ScraperError::Cancelled.into()),
            () = tokio::time::sleep(pause) => {}
        }
    }
}

pub(crate) fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ScraperError>(),
        Some(ScraperError::Cancelled)
    )
}

/// Ask a yes/no question on the terminal. An empty answer means yes.
async fn confirm(question: &str) -> anyhow::Result<bool> {
    let question = question.to_string();
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{question} [Y/n] ")?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await??;
    Ok(parse_answer(&answer))
}

pub(crate) fn parse_answer(answer: &str) -> bool {
    !matches!(answer.trim().to_ascii_lowercase().as_str(), "n" | "no")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_yes_answers_continue() {
        assert!(parse_answer("\n"));
        assert!(parse_answer("y\n"));
        assert!(parse_answer("Yes"));
    }

    #[test]
    fn no_answers_stop() {
        assert!(!parse_answer("n\n"));
        assert!(!parse_answer(" NO "));
    }

    #[test]
    fn cancelled_is_recognised_through_anyhow() {
        assert!(is_cancelled(&ScraperError::Cancelled.into()));
        assert!(!is_cancelled(&ScraperError::CaptchaFailed.into()));
        assert!(!is_cancelled(&anyhow::anyhow!("other")));
    }
}
