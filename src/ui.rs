//! Plain terminal output helpers

use console::style;

/// Display a section header
pub fn section(title: &str) {
    println!();
    println!("{}", style(title).bold());
}

/// Display a success step
pub fn step_ok(message: &str) {
    println!("  {} {}", style("[OK]").green(), message);
}

/// Display a success step with detail
pub fn step_ok_detail(message: &str, detail: &str) {
    println!("  {} {} ({})", style("[OK]").green(), message, detail);
}

/// Display a warning step with hint
pub fn step_warn_hint(message: &str, hint: &str) {
    println!("  {} {} - {}", style("[WARN]").yellow(), message, hint);
}

/// Display a failed check
pub fn step_error_detail(message: &str, detail: &str) {
    println!("  {} {}: {}", style("[FAIL]").red(), message, detail);
}

/// Display an aligned key/value line
pub fn key_value(key: &str, value: &str) {
    println!("  {:<18} {}", style(key).dim(), value);
}
