//! Backoff command implementation.

use serde::Serialize;
use shelfsync_core::RetryPolicy;

/// One row of the retry schedule.
#[derive(Debug, Serialize, PartialEq)]
pub struct BackoffRow {
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Delay before the next attempt, if one follows.
    pub delay_ms: Option<u128>,
    /// Time spent waiting before this attempt.
    pub elapsed_ms: u128,
}

/// Computes the schedule for `attempts` attempts.
pub fn schedule(policy: &RetryPolicy, attempts: u32) -> Vec<BackoffRow> {
    let mut elapsed_ms = 0;
    (0..attempts)
        .map(|attempt| {
            let delay_ms = (attempt + 1 < attempts).then(|| policy.next_delay(attempt).as_millis());
            let row = BackoffRow {
                attempt: attempt + 1,
                delay_ms,
                elapsed_ms,
            };
            elapsed_ms += delay_ms.unwrap_or(0);
            row
        })
        .collect()
}

/// Runs the backoff command.
pub fn run(
    policy: &RetryPolicy,
    attempts: Option<u32>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = schedule(policy, attempts.unwrap_or(policy.max_attempts));

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            println!("{:>8}  {:>10}  {:>10}", "attempt", "waited_ms", "delay_ms");
            for row in &rows {
                let delay = row
                    .delay_ms
                    .map_or_else(|| "-".to_string(), |d| d.to_string());
                println!("{:>8}  {:>10}  {:>10}", row.attempt, row.elapsed_ms, delay);
            }
        }
    }

    Ok(())
}
