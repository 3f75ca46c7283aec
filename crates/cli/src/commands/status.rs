use anyhow::Context;
use colored::Colorize;
use sideload_bolos::status::known_cause;

use crate::utils::display::warning;

/// Explain a status word returned by the dashboard
pub fn status_command(status: &str) -> anyhow::Result<()> {
    let status = status.trim();
    let digits = status
        .strip_prefix("0x")
        .or_else(|| status.strip_prefix("0X"))
        .unwrap_or(status);
    let sw = u16::from_str_radix(digits, 16)
        .with_context(|| format!("Invalid status word: {status}"))?;

    match known_cause(sw) {
        Some(cause) => println!("{}: {}", format!("{sw:04X}").bold(), cause),
        None => println!("{}", warning(&format!("No known cause for {sw:04X}"))),
    }

    Ok(())
}
