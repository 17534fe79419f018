use colored::Colorize;
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Duration Formatting
// ============================================================================

const SECOND_MS: u64 = 1000;
const MINUTE_MS: u64 = SECOND_MS * 60;
const HOUR_MS: u64 = MINUTE_MS * 60;

/// Format a duration using the largest unit that divides it exactly
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    if ms == 0 {
        "0s".to_string()
    } else if ms % HOUR_MS == 0 {
        format!("{}h", ms / HOUR_MS)
    } else if ms % MINUTE_MS == 0 {
        format!("{}m", ms / MINUTE_MS)
    } else if ms % SECOND_MS == 0 {
        format!("{}s", ms / SECOND_MS)
    } else {
        format!("{ms}ms")
    }
}

/// Parse a human-readable duration (e.g., "500ms", "30s", "5m", "1h")
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim().to_lowercase();

    if input.is_empty() {
        return Err("Empty duration string".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('h') {
        (num, HOUR_MS)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, MINUTE_MS)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, SECOND_MS)
    } else {
        (input.as_str(), SECOND_MS)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: '{}'", num_str.trim()))?;

    num.checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration too large: '{input}'"))
}
