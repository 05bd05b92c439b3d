mod ansi;
mod checks;
mod prompts;
mod writer;

use std::io::IsTerminal;

use rand::Rng;

use writer::SetupValues;

/// Entry point for `voice-bridge --setup`.
pub fn run() {
    if !std::io::stdin().is_terminal() {
        eprintln!("Error: --setup requires an interactive terminal");
        std::process::exit(1);
    }

    println!();
    println!("  {}", ansi::bold("voice-bridge setup"));
    println!("  {}", ansi::dim("Interactive configuration wizard"));

    if !checks::run_checks() {
        std::process::exit(1);
    }

    println!("\n  {} Twilio Configuration", ansi::bold(">>"));
    let twilio_account_sid = prompts::ask_secret("Account SID");
    let twilio_auth_token = prompts::ask_secret("Auth Token");
    let twilio_phone_number = loop {
        let num = prompts::ask("Phone Number (E.164)", None);
        if validate_e164(&num) {
            break num;
        }
        println!("  {} Invalid E.164 format (expected: +<digits>)", ansi::red("!"));
    };

    println!("\n  {} Realtime Provider", ansi::bold(">>"));
    let provider = loop {
        let choice = prompts::ask("Default provider (openai/elevenlabs)", Some("openai"));
        if choice == "openai" || choice == "elevenlabs" {
            break choice;
        }
        println!("  {} Enter \"openai\" or \"elevenlabs\"", ansi::red("!"));
    };
    let openai_api_key = if provider == "openai" {
        prompts::ask_secret("OpenAI API Key")
    } else {
        String::new()
    };
    let (elevenlabs_api_key, elevenlabs_agent_id) = if provider == "elevenlabs" {
        (prompts::ask_secret("ElevenLabs API Key"), prompts::ask("ElevenLabs Agent ID", None))
    } else {
        (String::new(), String::new())
    };
    let default_voice = prompts::ask("Default voice", Some("sage"));

    println!("\n  {} Server", ansi::bold(">>"));
    let external_url = prompts::ask("External URL", None);
    let max_concurrent_calls: usize = loop {
        let raw = prompts::ask("Max concurrent calls", Some("10"));
        match raw.parse() {
            Ok(n) if n > 0 => break n,
            _ => println!("  {} Enter a positive integer", ansi::red("!")),
        }
    };

    let api_secret = generate_hex_token(32);
    println!("\n  {} Generated API_SECRET", ansi::green("\u{2713}"));

    let values = SetupValues {
        twilio_account_sid,
        twilio_auth_token,
        twilio_phone_number,
        provider,
        openai_api_key,
        elevenlabs_api_key,
        elevenlabs_agent_id,
        default_voice,
        external_url: external_url.clone(),
        api_secret,
        max_concurrent_calls,
    };

    writer::write_config(&values);

    println!("\n  {} System installation (optional)", ansi::bold(">>"));

    if prompts::confirm("Copy binary to /usr/local/bin/?") {
        writer::install_binary();
    }
    if prompts::confirm("Install systemd service?") {
        writer::install_systemd();
    }
    if prompts::confirm("Generate nginx config?") {
        writer::install_nginx(&external_url);
    }

    println!("\n  {} Setup complete!", ansi::green("\u{2713}"));
    println!();
    println!("  Next steps:");
    println!("    1. Review ~/.voice-bridge/config.toml");
    println!("    2. Run: voice-bridge");
    println!("    3. Set the Twilio voice webhook to {external_url}/twilio/voice");
    println!();
}

fn validate_e164(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some('+')) && chars.clone().count() >= 7 && chars.all(|c| c.is_ascii_digit())
}

fn generate_hex_token(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}
