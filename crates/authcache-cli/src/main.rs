//! authcache - sign in from the terminal and reuse the session for later
//! API calls.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authcache_core::auth::validation::password_requirements;
use authcache_core::{ApiClient, Config, Navigator, Route, SessionManager, SessionStore};

/// Directory for the optional rolling log file
const LOG_DIR_ENV: &str = "AUTHCACHE_LOG_DIR";

/// Password source for non-interactive use
const PASSWORD_ENV: &str = "AUTHCACHE_PASSWORD";

/// Default for `--email` on login and register
const EMAIL_ENV: &str = "AUTHCACHE_EMAIL";

#[derive(Parser)]
#[command(name = "authcache", version, about = "Sign in and keep an authenticated session")]
struct Cli {
    /// Authentication server base URL (overrides config)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long, env = EMAIL_ENV)]
        email: Option<String>,

        /// Keep the session for 30 days instead of 1
        #[arg(long)]
        remember: bool,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        #[arg(long, env = EMAIL_ENV)]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show who is signed in
    Status,
    /// GET a URL, or a path on the auth server's host, with the session token attached
    Get { target: String },
}

/// Navigation has no pages in a terminal; tell the user what comes next.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, path: &str) {
        info!(path, "Navigate");
        if path == Route::Login.path() {
            eprintln!("Not signed in. Run `authcache login` to sign in.");
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "authcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }

    let store = Arc::new(SessionStore::from_boxed(config.open_storage()?));
    let api = ApiClient::new(&config.base_url, config.request_timeout())
        .context("Failed to build HTTP client")?;
    let manager = SessionManager::new(store, Arc::new(api.clone()), Arc::new(TerminalNavigator));
    let api = api.with_augmenter(manager.request_augmenter(api.endpoints().clone()));

    match cli.command {
        Command::Login { email, remember } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = read_password()?;

            let session = manager.submit_login(&email, &password, remember).await?;
            println!(
                "Signed in as {} ({} days)",
                session.identity.full_name(),
                session.days_until_expiry()
            );
            remember_email(&mut config, email);
        }
        Command::Register {
            first_name,
            last_name,
            email,
        } => {
            let email = match email {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = read_password()?;
            for requirement in password_requirements(&password).iter().filter(|r| !r.met) {
                eprintln!("  - {}", requirement.text);
            }

            let session = manager
                .submit_registration(&first_name, &last_name, &email, &password)
                .await?;
            println!("Welcome, {}!", session.identity.full_name());
            remember_email(&mut config, email);
        }
        Command::Logout => {
            manager.sign_out();
            println!("Signed out");
        }
        Command::Status => match manager.current_user() {
            Some(user) if manager.is_authenticated() => {
                println!("Signed in as {} <{}>", user.full_name(), user.email);
                println!("Role: {}", user.role.display_name());
                if let Some(expires_at) = manager.store().expires_at() {
                    println!("Session expires: {}", expires_at.format("%b %d, %Y %H:%M UTC"));
                }
            }
            _ => println!("Not signed in"),
        },
        Command::Get { target } => {
            let url = resolve_target(&config.base_url, &target)?;
            let body: serde_json::Value = api.get_json(url.as_str()).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

fn remember_email(config: &mut Config, email: String) {
    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

/// Absolute URLs are used as given; anything else is a path on the auth
/// server's host.
fn resolve_target(base_url: &str, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
        if url.has_host() {
            return Ok(url);
        }
    }

    let base = Url::parse(base_url).with_context(|| format!("Invalid base URL: {}", base_url))?;
    if !base.has_host() {
        bail!("Base URL has no host: {}", base_url);
    }
    let path = format!("/{}", target.trim_start_matches('/'));
    base.join(&path)
        .with_context(|| format!("Invalid target: {}", target))
}
