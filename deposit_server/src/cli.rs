use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 17] = [
        "RUST_LOG",
        "DRE_HOST",
        "DRE_PORT",
        "DRE_DATABASE_URL",
        "DRE_MAX_DB_CONNECTIONS",
        "DRE_SEARCH_WINDOW_SECS",
        "DRE_MAX_REQUEST_AGE_HOURS",
        "DRE_MAX_PAYMENT_DELAY_HOURS",
        "DRE_PAYMENT_LEASE_SECS",
        "DRE_GATEWAY_TIMEOUT_SECS",
        "DRE_POLLING_ENABLED",
        "DRE_POLL_INTERVAL_SECS",
        "DRE_POLL_LOOKBACK_HOURS",
        "DRE_POLL_BATCH_SIZE",
        "DRE_CASINO_API_URL",
        "DRE_NOTIFICATIONS_ENABLED",
        "DRE_TELEGRAM_API_URL",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
