//! eufy-login - interactive login against the Eufy Security cloud or a local gateway
//!
//! Challenges (CAPTCHA, second factor) are answered on stdin and resubmitted.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use eufy_login::{CloudLoginClient, Config, Credentials, GatewaySession, LoginOutcome};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

const MAX_CHALLENGE_ROUNDS: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "eufy-login")]
#[command(about = "Eufy Security login negotiation client", long_about = None)]
struct Args {
    /// Config file path (default: search config.toml locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Log in against the cloud account service
    Cloud {
        /// Account e-mail
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "EUFY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log in through a local eufy-security-ws gateway
    Gateway {
        /// Gateway WebSocket URL (overrides config)
        #[arg(short, long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_path = Config::locate(args.config.as_deref())?;
    let mut cfg = Config::load_from(config_path.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("eufy-login v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => tracing::debug!("Loaded config from: {}", path.display()),
        None => tracing::debug!("No config file found, using defaults"),
    }

    let mut prompt = Prompt::new();
    let outcome = match args.mode {
        Mode::Cloud { email, password } => {
            let credentials = Credentials::new(email, password);
            run_cloud(&cfg, &credentials, &mut prompt).await?
        }
        Mode::Gateway { url } => {
            if let Some(url) = url {
                cfg.gateway.url = url;
            }
            run_gateway(&cfg, &mut prompt).await?
        }
    };

    match outcome {
        LoginOutcome::Success { .. } => {
            tracing::info!("Login successful!");
            Ok(())
        }
        LoginOutcome::Error { message } if message.is_empty() => {
            bail!("Login failed: no login target gave a usable response")
        }
        LoginOutcome::Error { message } => bail!("Login failed: {}", message),
        other => bail!(
            "Login still requires {} after {} rounds",
            other.status(),
            MAX_CHALLENGE_ROUNDS
        ),
    }
}

/// Cloud login, resubmitting with challenge answers as needed
async fn run_cloud(
    cfg: &Config,
    credentials: &Credentials,
    prompt: &mut Prompt,
) -> Result<LoginOutcome> {
    let mut client = CloudLoginClient::new(&cfg.cloud, &cfg.http)?;
    let mut outcome = client.login(credentials).await;

    for _ in 0..MAX_CHALLENGE_ROUNDS {
        outcome = match &outcome {
            LoginOutcome::CaptchaRequired {
                challenge_id,
                challenge_image_ref,
            } => {
                println!("CAPTCHA image (open in a browser):\n{}", challenge_image_ref);
                let answer = prompt.ask("CAPTCHA answer: ").await?;
                client
                    .submit_captcha_answer(credentials, challenge_id, &answer)
                    .await
            }
            LoginOutcome::TwoFactorRequired => {
                let code = prompt.ask("Verification code: ").await?;
                client.submit_second_factor(credentials, &code).await
            }
            _ => break,
        };
    }

    if let Some(session) = client.session() {
        tracing::info!("Session established with {}", session.base_host);
    }
    Ok(outcome)
}

/// Gateway login, answering challenges on the same connection
async fn run_gateway(cfg: &Config, prompt: &mut Prompt) -> Result<LoginOutcome> {
    let mut session = GatewaySession::new(cfg.gateway.clone());
    let mut outcome = session.connect_and_login().await;

    for _ in 0..MAX_CHALLENGE_ROUNDS {
        let sent = match &outcome {
            LoginOutcome::CaptchaRequired {
                challenge_id,
                challenge_image_ref,
            } => {
                println!("CAPTCHA image (open in a browser):\n{}", challenge_image_ref);
                let answer = prompt.ask("CAPTCHA answer: ").await?;
                session.set_captcha_answer(challenge_id, &answer).await
            }
            LoginOutcome::TwoFactorRequired => {
                let code = prompt.ask("Verification code: ").await?;
                session.set_second_factor(&code).await
            }
            _ => break,
        };

        if !sent {
            outcome = LoginOutcome::error("failed to send answer to gateway");
            break;
        }
        outcome = session.observe_window().await;
    }

    session.close().await;
    Ok(outcome)
}

/// Line-based stdin prompt
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await?;
        stdout.flush().await?;

        match self.lines.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => bail!("stdin closed while waiting for input"),
        }
    }
}
