//! Small stderr helpers for human-readable command progress.

pub fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

pub fn success(message: &str) {
    eprintln!("✔️ {message}");
}

pub fn warn(message: &str) {
    eprintln!("⚠️ {message}");
}

pub fn bullet(message: &str) {
    eprintln!("• {message}");
}
