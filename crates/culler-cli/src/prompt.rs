use std::io::{BufRead, Write};

use culler_core::error::AppError;
use culler_core::models::Entity;
use culler_core::{Decision, OperatorPrompt};

/// Accounts listed before the question; the rest are summarised.
const PREVIEW: usize = 20;

/// Asks on the terminal whether to action the pending accounts.
///
/// `y` accepts once, `a` accepts and remembers, anything else rejects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl OperatorPrompt for TerminalPrompt {
    async fn ask(&self, pending: &[Entity]) -> Result<Decision, AppError> {
        let preview = render_preview(pending);
        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stderr = std::io::stderr().lock();
            stderr.write_all(preview.as_bytes())?;
            stderr.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await
        .map_err(|e| AppError::Generic(format!("Prompt task failed: {e}")))?
        .map_err(|e| AppError::Generic(format!("Failed to read answer: {e}")))?;

        Ok(parse_answer(&answer))
    }
}

fn render_preview(pending: &[Entity]) -> String {
    let mut out = format!("\n{} accounts will be unfollowed:\n", pending.len());
    for entity in pending.iter().take(PREVIEW) {
        out.push_str(&format!("  @{:<20} {}\n", entity.id, entity.label));
    }
    if pending.len() > PREVIEW {
        out.push_str(&format!("  ... and {} more\n", pending.len() - PREVIEW));
    }
    out.push_str("\nProceed? [y]es / [a]lways / [N]o: ");
    out
}

fn parse_answer(answer: &str) -> Decision {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Decision::accept(),
        "a" | "always" => Decision::accept_and_remember(),
        _ => Decision::reject(),
    }
}
