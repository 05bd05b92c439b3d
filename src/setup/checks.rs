use super::ansi;

/// Prerequisite checks run before the wizard asks for anything. Currently
/// only verifies the config directory is writable — returns `false` (and
/// the wizard exits) if it isn't.
pub fn run_checks() -> bool {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_dir = std::path::PathBuf::from(home).join(".voice-bridge");

    if let Err(e) = std::fs::create_dir_all(&config_dir) {
        println!(
            "  {} Cannot create {}: {e}",
            ansi::red("\u{2717}"),
            config_dir.display()
        );
        return false;
    }

    println!("  {} Config directory ready: {}", ansi::green("\u{2713}"), config_dir.display());
    true
}
