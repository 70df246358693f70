use std::env;
use std::io::{self, IsTerminal, Write};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use chatgate_client::{ChatClient, ClientAuth, Conversation, StreamOutcome};
use chatgate_protocol::{ChatRequest, ContentKind, Message, Role};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scheme {
    Csrf,
    Hmac,
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "chatgate-chat - send one prompt through a chatgate relay."
)]
struct Cli {
    /// Base URL of the relay
    #[arg(long, env = "CHATGATE_URL", default_value = "http://127.0.0.1:3000")]
    url: String,
    /// Authentication scheme the relay is configured for
    #[arg(long, value_enum, default_value = "csrf")]
    scheme: Scheme,
    /// Shared secret (hmac scheme)
    #[arg(long, env = "CHATGATE_SECRET", hide_env_values = true)]
    secret: Option<String>,
    /// Application id (hmac scheme)
    #[arg(long, default_value = "chatgate-web")]
    app_id: String,
    /// Model to request instead of the relay default
    #[arg(long)]
    model: Option<String>,
    /// Optional system prompt
    #[arg(long)]
    system: Option<String>,
    /// Request a single JSON response instead of a stream
    #[arg(long)]
    no_stream: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
    /// Output logs as JSON
    #[arg(long)]
    json: bool,
    /// Prompt to send
    prompt: String,
}

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    let auth = match cli.scheme {
        Scheme::Csrf => ClientAuth::csrf(&cli.url)?,
        Scheme::Hmac => {
            let secret = cli
                .secret
                .as_deref()
                .context("--secret (or CHATGATE_SECRET) is required for the hmac scheme")?;
            ClientAuth::hmac(secret, cli.app_id.clone())
        }
    };
    let client = ChatClient::new(&cli.url, auth).context("creating chat client")?;

    let mut messages = Vec::new();
    if let Some(system) = cli.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(cli.prompt));
    let mut conversation = Conversation::with_messages(messages.clone());

    let mut request = ChatRequest::new(messages);
    request.model = cli.model;
    request.stream = !cli.no_stream;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling request");
            on_signal.cancel();
        }
    });

    let outcome = client
        .send_chat(&mut conversation, &request, &cancel)
        .await
        .context("chat request failed")?;
    if outcome == StreamOutcome::Aborted {
        info!("response aborted");
    }

    print_messages(&conversation)?;
    Ok(())
}

fn print_messages(conversation: &Conversation) -> Result<()> {
    let mut out = io::stdout().lock();
    for message in conversation.messages() {
        match (message.role, message.kind) {
            (Role::User | Role::System, _) => continue,
            (_, Some(ContentKind::Tool)) => {
                for call in message.tool_calls.iter().flatten() {
                    writeln!(out, "[tool {}] {}({})", call.id, call.name, call.arguments)?;
                }
                if !message.content.is_empty() {
                    writeln!(out, "{}", message.content)?;
                }
            }
            _ => {
                if let Some(reasoning) = &message.reasoning {
                    writeln!(out, "[reasoning] {reasoning}")?;
                }
                writeln!(out, "{}", message.content)?;
            }
        }
    }
    Ok(())
}

fn init_logging(verbose: u8, json: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("chatgate_chat={level},chatgate_client={level}"))
    });

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        let ansi = env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(ansi),
            )
            .try_init()
            .ok();
    }
}
