use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::ansi;
use super::prompts::confirm;

/// All values collected from the wizard prompts.
pub struct SetupValues {
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub provider: String,
    pub openai_api_key: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_agent_id: String,
    pub default_voice: String,
    pub external_url: String,
    pub api_secret: String,
    pub max_concurrent_calls: usize,
}

/// Write config.toml and .env to ~/.voice-bridge/. Returns the config
/// directory path.
pub fn write_config(values: &SetupValues) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_dir = PathBuf::from(home).join(".voice-bridge");

    println!("\n  {} Writing configuration", ansi::bold(">>"));

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).expect("Failed to create ~/.voice-bridge");
    }

    let config_path = config_dir.join("config.toml");
    if config_path.exists() && !confirm("config.toml already exists. Overwrite?") {
        println!("  Skipping config.toml");
    } else {
        write_config_toml(&config_path, values);
    }

    let env_path = config_dir.join(".env");
    if env_path.exists() && !confirm(".env already exists. Overwrite?") {
        println!("  Skipping .env");
    } else {
        write_env_file(&env_path, values);
    }

    config_dir
}

fn write_config_toml(path: &Path, values: &SetupValues) {
    let content = format!(
        r#"[server]
host = "0.0.0.0"
port = 8443
# Secret loaded from .env (SERVER_EXTERNAL_URL)
external_url = ""

[twilio]
# Secrets loaded from .env (TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN)
account_sid = ""
auth_token = ""
phone_number = "{phone}"

[provider]
default = "{provider}"
# Secrets loaded from .env (OPENAI_API_KEY, ELEVENLABS_API_KEY)
openai_api_key = ""
elevenlabs_api_key = ""
elevenlabs_agent_id = "{agent_id}"
default_voice = "{voice}"
default_system_instructions = "You are a helpful phone assistant. Keep responses brief and conversational."

[api]
# Secret loaded from .env (API_SECRET)
secret = ""

[caps]
max_concurrent_calls = {max_calls}
max_concurrent_outgoing_calls = 5
max_concurrent_incoming_calls = 5
max_outgoing_call_duration = 600
max_incoming_call_duration = 1800

[storage]
sqlite_path = "calls.sqlite3"
"#,
        phone = values.twilio_phone_number,
        provider = values.provider,
        agent_id = values.elevenlabs_agent_id,
        voice = values.default_voice,
        max_calls = values.max_concurrent_calls,
    );

    fs::write(path, content).expect("Failed to write config.toml");
    println!("  {} {}", ansi::green("\u{2713}"), path.display());
}

fn write_env_file(path: &Path, values: &SetupValues) {
    let content = format!(
        r#"# Twilio
TWILIO_ACCOUNT_SID={twilio_sid}
TWILIO_AUTH_TOKEN={twilio_token}

# Realtime providers
OPENAI_API_KEY={openai_key}
ELEVENLABS_API_KEY={elevenlabs_key}

# Control-plane shared secret (query string `?secret=`)
API_SECRET={api_secret}

# Public URL where Twilio can reach this server
SERVER_EXTERNAL_URL={external_url}
"#,
        twilio_sid = values.twilio_account_sid,
        twilio_token = values.twilio_auth_token,
        openai_key = values.openai_api_key,
        elevenlabs_key = values.elevenlabs_api_key,
        api_secret = values.api_secret,
        external_url = values.external_url,
    );

    fs::write(path, &content).expect("Failed to write .env");

    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms).expect("Failed to set .env permissions");

    println!("  {} {} {}", ansi::green("\u{2713}"), path.display(), ansi::dim("(mode 0600)"));
}

/// Copy the current binary to /usr/local/bin/voice-bridge.
pub fn install_binary() {
    let current_exe = std::env::current_exe().expect("Failed to get current executable path");
    let target = Path::new("/usr/local/bin/voice-bridge");

    match fs::copy(&current_exe, target) {
        Ok(_) => {
            let perms = fs::Permissions::from_mode(0o755);
            fs::set_permissions(target, perms).ok();
            println!("  {} Copied to {}", ansi::green("\u{2713}"), target.display());
        }
        Err(e) => {
            println!("  {} Failed to copy binary: {e} (try running with sudo)", ansi::red("\u{2717}"));
        }
    }
}

/// Write a systemd service unit to /etc/systemd/system/.
pub fn install_systemd() {
    let unit = r#"[Unit]
Description=voice-bridge — realtime voice-agent bridge
After=network.target

[Service]
Type=simple
User=root
ExecStart=/usr/local/bin/voice-bridge
Environment=RUST_LOG=voice_bridge=info,tower_http=info
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#;

    let path = Path::new("/etc/systemd/system/voice-bridge.service");
    match fs::write(path, unit) {
        Ok(_) => {
            println!("  {} {}", ansi::green("\u{2713}"), path.display());
            println!("  {}", ansi::dim("Run: systemctl daemon-reload && systemctl enable --now voice-bridge"));
        }
        Err(e) => {
            println!("  {} Failed to write service: {e} (try running with sudo)", ansi::red("\u{2717}"));
        }
    }
}

/// Write an nginx reverse proxy config for the given domain.
pub fn install_nginx(external_url: &str) {
    let domain = external_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');

    let config = format!(
        r#"server {{
    listen 443 ssl;
    server_name {domain};

    ssl_certificate /etc/letsencrypt/live/{domain}/fullchain.pem;
    ssl_certificate_key /etc/letsencrypt/live/{domain}/privkey.pem;

    location /twilio/ {{
        proxy_pass http://127.0.0.1:8443;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;

        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_read_timeout 86400;
    }}

    location /calls/ {{
        proxy_pass http://127.0.0.1:8443;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }}

    location /health {{
        proxy_pass http://127.0.0.1:8443;
    }}
}}

server {{
    listen 80;
    server_name {domain};

    location /.well-known/acme-challenge/ {{
        root /var/www/html;
    }}

    location / {{
        return 301 https://$host$request_uri;
    }}
}}
"#,
        domain = domain,
    );

    let path = Path::new("/etc/nginx/sites-available/voice-bridge");

    match fs::write(path, &config) {
        Ok(_) => {
            println!("  {} {}", ansi::green("\u{2713}"), path.display());
            println!(
                "  {}",
                ansi::dim(
                    "Run: ln -sf /etc/nginx/sites-available/voice-bridge /etc/nginx/sites-enabled/ && nginx -t && systemctl reload nginx"
                )
            );
        }
        Err(e) => {
            println!("  {} Failed to write nginx config: {e} (try running with sudo)", ansi::red("\u{2717}"));
        }
    }
}
