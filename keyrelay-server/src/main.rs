use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use keyrelay_core::frame::MAX_LINE_LENGTH;
use keyrelay_core::{Cipher, PassthroughCipher, RsaCipher, DEFAULT_KEY_BITS};
use keyrelay_server::config::{DEFAULT_MAX_SESSIONS, DEFAULT_QUEUE_DEPTH};
use keyrelay_server::{RelayConfig, RelayListener};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keyrelay-server")]
#[command(about = "keyrelay relay - decrypts and re-encrypts messages for every connected peer")]
struct Args {
    /// TCP listen address
    #[arg(long, env = "KEYRELAY_LISTEN", default_value = "0.0.0.0:12345")]
    listen: SocketAddr,

    /// RSA modulus size for the relay key
    #[arg(long, env = "KEYRELAY_KEY_BITS", default_value_t = DEFAULT_KEY_BITS)]
    key_bits: usize,

    /// Maximum concurrent sessions
    #[arg(long, env = "KEYRELAY_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,

    /// Outbound lines buffered per session
    #[arg(long, env = "KEYRELAY_QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// Longest accepted line in bytes
    #[arg(long, env = "KEYRELAY_MAX_LINE_LENGTH", default_value_t = MAX_LINE_LENGTH)]
    max_line_length: usize,

    /// Use the no-op passthrough cipher (smoke testing only, no confidentiality)
    #[arg(long, default_value_t = false)]
    passthrough: bool,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig::new(self.listen)
            .with_key_bits(self.key_bits)
            .with_max_sessions(self.max_sessions)
            .with_queue_depth(self.queue_depth)
            .with_max_line_length(self.max_line_length)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.relay_config();

    if args.passthrough {
        warn!("passthrough cipher enabled: messages are NOT encrypted");
        serve(config, PassthroughCipher::new("keyrelay")).await
    } else {
        info!(bits = config.key_bits, "generating relay key pair");
        let bits = config.key_bits;
        let cipher = tokio::task::spawn_blocking(move || RsaCipher::generate(bits))
            .await
            .context("key generation task panicked")?
            .context("failed to generate relay key pair")?;
        serve(config, cipher).await
    }
}

async fn serve<C: Cipher>(config: RelayConfig, cipher: C) -> Result<()> {
    let listener = RelayListener::bind(config, Arc::new(cipher))
        .await
        .context("failed to start relay")?;

    listener
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("relay stopped");
    Ok(())
}
