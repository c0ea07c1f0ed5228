//!
//! inogr server binary
//! -------------------
//! Command-line entry point for the session gate and site. Configuration comes from
//! `INOGR_*` environment variables; a few CLI flags override them.

use anyhow::{Context, Result};
use std::env;

use inogr_gate::config::GateConfig;

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("inogr Server\n\nUSAGE:\n  inogr_server [--http-port N] [--bind ADDR]\n\nOPTIONS:\n  --http-port N    HTTP port (env: INOGR_HTTP_PORT, default 3000)\n  --bind ADDR      Bind address (env: INOGR_BIND, default 0.0.0.0)\n\nSession cookie keys are read from INOGR_COOKIE_KEYS or INOGR_COOKIE_KEYS_FILE.\nGenerate one with: inogr_session gen-key\n");
        return Ok(());
    }

    println!(r"    _
   (_)___  ____  ____ ______
  / / __ \/ __ \/ __ `/ ___/
 / / / / / /_/ / /_/ / /
/_/_/ /_/\____/\__, /_/
              /____/        ");

    // RUST_LOG wins; otherwise info
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let mut config = GateConfig::from_env().context("While reading INOGR_* configuration")?;

    // CLI arguments override environment
    if let Some(port) = arg_value(&args, "--http-port") {
        config.http_port = port.parse::<u16>().with_context(|| format!("Invalid --http-port '{}'", port))?;
    }
    if let Some(bind) = arg_value(&args, "--bind") {
        config.bind = bind;
    }

    println!("inogr starting on {}:{}", config.bind, config.http_port);
    tracing::info!("Using bind={} http={}", config.bind, config.http_port);
    inogr_gate::server::run(config).await
}
