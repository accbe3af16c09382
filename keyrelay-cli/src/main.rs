use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use keyrelay_core::{Cipher, PassthroughCipher, RsaCipher, DEFAULT_KEY_BITS};
use keyrelay_server::{RelayConfig, RelayListener};
use keyrelay_transport::config::DEFAULT_RELAY_ADDR;
use keyrelay_transport::{ClientConfig, Message, PeerClient};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keyrelay-cli")]
#[command(about = "Chat through a keyrelay relay. Type a line to send it, `exit` to quit.")]
struct Args {
    /// Relay address (host:port)
    #[arg(long, env = "KEYRELAY_RELAY", default_value = DEFAULT_RELAY_ADDR)]
    relay: String,

    /// RSA modulus size for our key (and the embedded relay's)
    #[arg(long, env = "KEYRELAY_KEY_BITS", default_value_t = DEFAULT_KEY_BITS)]
    key_bits: usize,

    /// Use the no-op passthrough cipher (smoke testing only, no confidentiality)
    #[arg(long, default_value_t = false)]
    passthrough: bool,

    /// Start a relay in this process on --relay's address, then connect to it
    #[arg(long, default_value_t = false)]
    embedded_relay: bool,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs on stderr so they stay out of the conversation.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.passthrough {
        warn!("passthrough cipher enabled: messages are NOT encrypted");
        if args.embedded_relay {
            start_relay(&args, PassthroughCipher::new("keyrelay")).await?;
        }
        chat(&args, Arc::new(PassthroughCipher::new("keyrelay-cli"))).await
    } else {
        if args.embedded_relay {
            start_relay(&args, generate_rsa(args.key_bits).await?).await?;
        }
        chat(&args, Arc::new(generate_rsa(args.key_bits).await?)).await
    }
}

async fn generate_rsa(bits: usize) -> Result<RsaCipher> {
    info!(bits, "generating key pair");
    tokio::task::spawn_blocking(move || RsaCipher::generate(bits))
        .await
        .context("key generation task panicked")?
        .context("failed to generate key pair")
}

/// Bind a relay on `--relay` and serve it in the background.
///
/// Returns once the socket is bound, so connecting right after cannot race
/// the listener.
async fn start_relay<C: Cipher>(args: &Args, cipher: C) -> Result<()> {
    let listen: SocketAddr = args
        .relay
        .parse()
        .with_context(|| format!("--embedded-relay needs an IP:port address, got {}", args.relay))?;
    let config = RelayConfig::new(listen).with_key_bits(args.key_bits);
    let relay = RelayListener::bind(config, Arc::new(cipher))
        .await
        .context("failed to start embedded relay")?;
    tokio::spawn(relay.run());
    Ok(())
}

async fn chat<C: Cipher>(args: &Args, cipher: Arc<C>) -> Result<()> {
    let (tx, mut incoming) = mpsc::unbounded_channel::<Message>();
    let config = ClientConfig::new(args.relay.clone());
    let mut client = PeerClient::connect(&config, cipher, tx)
        .await
        .with_context(|| format!("could not join relay at {}", args.relay))?;

    println!(
        "Connected to {} (relay key {}). Type `exit` to quit.",
        args.relay,
        client.relay_fingerprint()
    );

    let mut stdin = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    loop {
        tokio::select! {
            message = incoming.recv() => match message {
                Some(message) => println!("[Received] {}", message.as_str()),
                None => {
                    println!("Connection to relay lost.");
                    break;
                }
            },
            line = stdin.next() => {
                let line = match line {
                    Some(line) => line.context("failed to read stdin")?,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                match client.send_text(&line).await {
                    // `exit` closes the client without an error.
                    Ok(()) if !client.is_active() => break,
                    Ok(()) => {}
                    Err(e) if e.is_recoverable() => eprintln!("Not sent: {e}"),
                    Err(e) => return Err(e).context("connection to relay lost"),
                }
            }
        }
    }

    client.close().await;
    println!("Disconnected.");
    Ok(())
}
