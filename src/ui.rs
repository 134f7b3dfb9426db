use colored::Colorize;
use provision::StepDuration;
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

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Formatting
// ============================================================================

/// Format a duration for the step summary
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Render the per-step timing table
pub fn step_table(durations: &[StepDuration], total: Duration) -> Vec<String> {
    let width = durations
        .iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0)
        .max("total".len());
    let mut lines: Vec<String> = durations
        .iter()
        .map(|d| format!("{:<width$}  {:>8}", d.name, format_duration(d.duration)))
        .collect();
    lines.push(format!("{:<width$}  {:>8}", "total", format_duration(total)));
    lines
}

/// Print the per-step timing table
pub fn print_steps(durations: &[StepDuration], total: Duration) {
    header("Steps");
    let lines = step_table(durations, total);
    if let Some((total_line, steps)) = lines.split_last() {
        for line in steps {
            println!("  {line}");
        }
        println!("  {}", total_line.bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }

    #[test]
    fn test_step_table_alignment() {
        let durations = vec![
            StepDuration {
                name: "verify-roles",
                duration: Duration::from_millis(5),
            },
            StepDuration {
                name: "create-package",
                duration: Duration::from_millis(1500),
            },
        ];
        let lines = step_table(&durations, Duration::from_secs(2));
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "verify-roles         5ms");
        assert!(lines[2].starts_with("total "));
        assert!(lines[2].ends_with("2.0s"));
    }
}
