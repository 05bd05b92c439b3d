use std::io::Write;

/// Prompts for a value, returning `default` if the user presses enter on an
/// empty line.
pub fn ask(label: &str, default: Option<&str>) -> String {
    loop {
        match default {
            Some(d) => print!("  {label} [{d}]: "),
            None => print!("  {label}: "),
        }
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            std::process::exit(1);
        }
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if let Some(d) = default {
                return d.to_string();
            }
            continue;
        }
        return trimmed.to_string();
    }
}

/// Like [`ask`], but the input is masked (used for API keys/tokens).
pub fn ask_secret(label: &str) -> String {
    loop {
        match rpassword::prompt_password(format!("  {label}: ")) {
            Ok(value) if !value.trim().is_empty() => return value.trim().to_string(),
            _ => println!("  {} this field is required", super::ansi::red("!")),
        }
    }
}

pub fn confirm(question: &str) -> bool {
    loop {
        print!("  {question} [y/N]: ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return true,
            "" | "n" | "no" => return false,
            _ => println!("  {} please answer y or n", super::ansi::red("!")),
        }
    }
}
