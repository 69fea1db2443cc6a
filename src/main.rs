//! pawsync -- Session synchronization client for the PawTrack platform.
//!
//! This is the command-line entry point. It wires together all modules:
//!   - Configuration loading and env overrides
//!   - Session storage and store rehydration
//!   - Identity provider client
//!   - Backend sync client
//!   - The session synchronizer driving them

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use pawsync::backend::SyncClient;
use pawsync::config::{default_config_path, Config};
use pawsync::error::FlowError;
use pawsync::guard::{GuardOutcome, RouteGuard};
use pawsync::identity::{RestIdentityProvider, RestProviderConfig};
use pawsync::session::storage::storage_from_config;
use pawsync::session::{SessionStore, SessionStorage};
use pawsync::sync::Synchronizer;

// ---------------------------------------------------------------------------
// CLI argument parsing (hand-rolled, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Login,
    Register,
    Logout,
}

struct CliArgs {
    command: Option<Command>,
    config_path: Option<PathBuf>,
    email: Option<String>,
    name: Option<String>,
    json: bool,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut cli = CliArgs {
        command: None,
        config_path: None,
        email: None,
        name: None,
        json: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    cli.config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--email" => {
                if let Some(email) = args.next() {
                    cli.email = Some(email);
                } else {
                    eprintln!("Error: --email requires a value");
                    std::process::exit(1);
                }
            }
            "--name" => {
                if let Some(name) = args.next() {
                    cli.name = Some(name);
                } else {
                    eprintln!("Error: --name requires a value");
                    std::process::exit(1);
                }
            }
            "--json" => cli.json = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("pawsync {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "status" if cli.command.is_none() => cli.command = Some(Command::Status),
            "login" if cli.command.is_none() => cli.command = Some(Command::Login),
            "register" if cli.command.is_none() => cli.command = Some(Command::Register),
            "logout" if cli.command.is_none() => cli.command = Some(Command::Logout),
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    cli
}

fn print_usage() {
    println!(
        "\
pawsync {version} -- PawTrack session synchronization client

USAGE:
    pawsync <COMMAND> [OPTIONS]

COMMANDS:
    status      Show the current session and route-guard decision
    login       Sign in and sync the canonical user
    register    Create an account and sync the registration
    logout      Sign out and clear the stored session

OPTIONS:
    -c, --config <PATH>    Path to configuration file
        --email <EMAIL>    Email address for login/register
        --name <NAME>      Display name for register
        --json             Print status as JSON
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    PAWSYNC_CONFIG         Alternative to --config flag
    PAWSYNC_PASSWORD       Password for login/register (prompted otherwise)
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .thread_stack_size(10 * 1024 * 1024) // 10 MiB per worker thread
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments
    let cli = parse_args();
    let Some(command) = cli.command else {
        print_usage();
        std::process::exit(1);
    };

    // Allow PAWSYNC_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("PAWSYNC_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or(cli.config_path)
        .unwrap_or_else(default_config_path);

    // 2. Load configuration
    let config = Config::load(&config_path)?;

    // 3. Initialize tracing/logging
    init_tracing(&config);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting pawsync"
    );

    // 4. Rehydrate the session store before anything can mutate it
    let storage = storage_from_config(&config.storage);
    tracing::debug!(backend = storage.name(), "Session storage selected");
    let store = Arc::new(SessionStore::open(storage).await?);

    // 5. Wire the synchronizer
    let provider = Arc::new(RestIdentityProvider::new(RestProviderConfig {
        base_url: config.identity.base_url.clone(),
        api_key: config.identity.api_key.clone(),
    }));
    let backend = SyncClient::from_config(&config);
    let sync = Synchronizer::new(provider, backend, store);

    // 6. Run the requested command
    match command {
        Command::Status => cmd_status(&sync, cli.json).await,
        Command::Login => cmd_login(&sync, cli.email).await,
        Command::Register => cmd_register(&sync, cli.email, cli.name).await,
        Command::Logout => cmd_logout(&sync).await,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_status(sync: &Synchronizer, json: bool) -> anyhow::Result<()> {
    let state = sync.store().snapshot().await;
    let outcome = RouteGuard::new().evaluate(&state);

    if json {
        let doc = serde_json::json!({
            "status": state.status,
            "user": state.user,
            "token_present": state.token.is_some(),
            "isAuthenticated": state.is_authenticated(),
            "profileComplete": state.profile_complete(),
            "error": state.error,
            "guard": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Session status: {}", state.status);
    match &state.user {
        Some(user) => {
            println!("User:           {} <{}> (id {})", user.name, user.email, user.id);
            println!(
                "Profile:        {}",
                if user.profile_complete { "complete" } else { "incomplete" }
            );
        }
        None => println!("User:           none"),
    }
    println!(
        "Token:          {}",
        if state.token.is_some() { "present" } else { "none" }
    );
    if let Some(error) = &state.error {
        println!("Last error:     {error}");
    }
    println!("Route guard:    {}", describe_outcome(&outcome));
    Ok(())
}

async fn cmd_login(sync: &Synchronizer, email: Option<String>) -> anyhow::Result<()> {
    let email = require_arg(email, "--email")?;
    let password = resolve_password()?;
    match sync.login(&email, &password).await {
        Ok(user) => {
            println!("Signed in as {} <{}>", user.name, user.email);
            if !user.profile_complete {
                println!("Your profile is incomplete. Finish onboarding in the app.");
            }
            Ok(())
        }
        Err(error) => flow_failure(error),
    }
}

async fn cmd_register(
    sync: &Synchronizer,
    email: Option<String>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let email = require_arg(email, "--email")?;
    let name = require_arg(name, "--name")?;
    let password = resolve_password()?;
    match sync.register(&email, &password, &name).await {
        Ok(user) => {
            println!("Account created. Welcome, {}!", user.name);
            Ok(())
        }
        Err(error) => flow_failure(error),
    }
}

async fn cmd_logout(sync: &Synchronizer) -> anyhow::Result<()> {
    match sync.logout().await {
        Ok(()) => {
            println!("Signed out.");
            Ok(())
        }
        Err(error) => flow_failure(error),
    }
}

fn describe_outcome(outcome: &GuardOutcome) -> String {
    match outcome {
        GuardOutcome::Loading => "loading placeholder".to_string(),
        GuardOutcome::Allow => "allow".to_string(),
        GuardOutcome::Redirect { to } => format!("redirect to {to}"),
    }
}

fn require_arg(value: Option<String>, flag: &str) -> anyhow::Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("missing required argument: {flag}"))
}

fn resolve_password() -> anyhow::Result<String> {
    if let Ok(password) = std::env::var("PAWSYNC_PASSWORD") {
        return Ok(password);
    }
    use std::io::Write;
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Log the failure for operators, show the short message to the user.
fn flow_failure(error: FlowError) -> anyhow::Result<()> {
    tracing::error!(error = %error, "flow failed");
    eprintln!("{}", error.user_message());
    std::process::exit(1);
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Install the global tracing subscriber from the logging config.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        // Set the pawsync crates to the configured level, dependencies to warn
        EnvFilter::new(format!("pawsync={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_usage_does_not_panic() {
        // Just verify it doesn't panic.
        print_usage();
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(describe_outcome(&GuardOutcome::Allow), "allow");
        assert_eq!(
            describe_outcome(&GuardOutcome::Redirect {
                to: "/login".to_string()
            }),
            "redirect to /login"
        );
    }

    #[test]
    fn test_require_arg() {
        assert_eq!(require_arg(Some("x".to_string()), "--email").unwrap(), "x");
        assert!(require_arg(None, "--email").is_err());
    }
}
