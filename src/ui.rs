use anyhow::{Context, Result};
use std::io::{BufRead, Write};

pub(crate) fn progress(message: &str) {
    eprintln!("==> {message}");
}

/// Prompt on stdout and read one trimmed line from stdin.
pub(crate) fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read stdin")?;
    Ok(line.trim().to_string())
}

/// Yes/no confirmation defaulting to no.
pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    let answer = read_line(prompt)?.to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

pub(crate) fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let head: String = value.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}
