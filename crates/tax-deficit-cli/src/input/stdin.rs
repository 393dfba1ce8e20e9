use std::io::{self, Read};

use super::RunFile;

/// Read a run file from stdin if data is being piped.
/// Returns None if stdin is a TTY (interactive).
pub fn read_stdin() -> Result<Option<RunFile>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;

    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // JSON first, then YAML
    let run = match serde_json::from_str(trimmed) {
        Ok(run) => run,
        Err(_) => serde_yaml::from_str(trimmed)?,
    };
    Ok(Some(run))
}
