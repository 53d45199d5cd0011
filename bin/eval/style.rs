//! Terminal styling for CLI output

pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const WHITE: &str = "\x1b[37m";
}

use colors::*;

pub fn style_bold(s: &str) -> String {
    format!("{}{}{}", BOLD, s, RESET)
}

pub fn style_dim(s: &str) -> String {
    format!("{}{}{}", DIM, s, RESET)
}

pub fn icon_success() -> String {
    format!("{}✓{}", GREEN, RESET)
}

pub fn icon_error() -> String {
    format!("{}✗{}", RED, RESET)
}

pub fn print_header(title: &str) {
    println!("\n  {}\n", style_bold(title));
}

pub fn print_key_value(key: &str, value: &str) {
    println!("  {:<14} {}", style_dim(key), value);
}

pub fn print_key_value_colored(key: &str, value: &str, color: &str) {
    println!("  {:<14} {}{}{}", style_dim(key), color, value, RESET);
}

/// Color for a job or container state word.
pub fn state_color(state: &str) -> &'static str {
    match state {
        "running" => CYAN,
        "completed" => GREEN,
        "failed" | "absent" => RED,
        "unknown" | "stopped" => YELLOW,
        _ => WHITE,
    }
}
