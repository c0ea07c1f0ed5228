//!
//! inogr session tool
//! ------------------
//! Operator commands for the session cookie: generate signing keys, mint a cookie for
//! a given identity, and inspect a cookie against the configured key ring. Keys are
//! read from the same INOGR_COOKIE_KEYS / INOGR_COOKIE_KEYS_FILE the server uses.

use std::env;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::json;

use inogr_gate::config::{parse_bool, GateConfig, SigningKey};
use inogr_gate::identity::{ClaimSet, Role, SessionCodec, SessionVerifier, Verification};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} gen-key\n  {program} mint --uid <uid> [--email <email>] [--role <role>] [--admin true|false] [--ttl-secs N]\n  {program} inspect <token>\n\nCommands:\n  gen-key      Print a new random 32-byte signing key (base64:...) for INOGR_COOKIE_KEYS\n  mint         Sign a session cookie with the first configured key and print it\n  inspect      Verify a cookie against every configured key and print the result as JSON\n\nRoles: User, Admin, Super Admin. Without --admin the flag follows the role."
    );
}

fn load_codec(ttl_secs: Option<i64>) -> Result<SessionCodec> {
    let config = GateConfig::from_env().context("While reading INOGR_* configuration")?;
    if config.signing_keys.is_empty() {
        bail!("no signing keys configured; set INOGR_COOKIE_KEYS or INOGR_COOKIE_KEYS_FILE");
    }
    let ttl = ttl_secs.unwrap_or(config.cookie.max_age_secs);
    Ok(SessionCodec::new(&config.signing_keys, ttl)?)
}

fn gen_key() -> Result<()> {
    let key = SigningKey::generate()?;
    println!("{}", key.to_config_string());
    Ok(())
}

fn mint(args: &[String]) -> Result<()> {
    let mut uid: Option<String> = None;
    let mut email: Option<String> = None;
    let mut role = Role::User;
    let mut admin: Option<bool> = None;
    let mut ttl_secs: Option<i64> = None;

    let mut i = 0;
    while i < args.len() {
        let value = || args.get(i + 1).cloned().ok_or_else(|| anyhow!("{} requires a value", args[i]));
        match args[i].as_str() {
            "--uid" => uid = Some(value()?),
            "--email" => email = Some(value()?),
            "--role" => {
                let v = value()?;
                role = v.parse::<Role>().map_err(|e| anyhow!("{}", e))?;
            }
            "--admin" => {
                let v = value()?;
                admin = Some(parse_bool(&v).ok_or_else(|| anyhow!("--admin expects true or false, got '{}'", v))?);
            }
            "--ttl-secs" => {
                let v = value()?;
                ttl_secs = Some(v.parse::<i64>().with_context(|| format!("Invalid --ttl-secs '{}'", v))?);
            }
            other => bail!("Unrecognized argument: {}", other),
        }
        i += 2;
    }

    let uid = uid.ok_or_else(|| anyhow!("mint requires --uid"))?;
    let mut claims = ClaimSet::new(uid).with_role(role);
    if let Some(e) = email {
        claims = claims.with_email(e);
    }
    if let Some(a) = admin {
        claims = claims.with_admin(a);
    }

    let codec = load_codec(ttl_secs)?;
    let session = codec.issue(claims)?;
    let out = json!({
        "token": session.token,
        "uid": session.claims.subject,
        "role": session.claims.role,
        "admin": session.claims.is_admin,
        "issued_at": session.issued_at.to_rfc3339(),
        "expires_at": session.expires_at.to_rfc3339(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn inspect(token: &str) -> Result<()> {
    let codec = load_codec(None)?;
    let out = match codec.verify(token.trim()) {
        Verification::Valid(c) => json!({
            "valid": true,
            "uid": c.subject,
            "email": c.email,
            "role": c.role,
            "admin": c.is_admin,
            "checked_at": Utc::now().to_rfc3339(),
        }),
        Verification::Invalid(reason) => json!({
            "valid": false,
            "reason": reason.as_str(),
            "keys_tried": codec.key_count(),
            "checked_at": Utc::now().to_rfc3339(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Program name and the arguments after it. An empty argv (possible via exec) is not an error.
fn split_argv(argv: &[String]) -> (String, &[String]) {
    let program = argv.first().cloned().unwrap_or_else(|| "inogr_session".to_string());
    (program, argv.get(1..).unwrap_or(&[]))
}

fn main() -> Result<()> {
    let argv: Vec<String> = env::args().collect();
    let (program, args) = split_argv(&argv);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let Some(cmd) = args.first().cloned() else {
        print_usage(&program);
        std::process::exit(2);
    };
    match cmd.as_str() {
        "gen-key" => gen_key(),
        "mint" => mint(&args[1..]),
        "inspect" => {
            let Some(token) = args.get(1) else {
                eprintln!("inspect requires a token");
                print_usage(&program);
                std::process::exit(2);
            };
            inspect(token)
        }
        "-h" | "--help" | "help" => {
            print_usage(&program);
            Ok(())
        }
        unk => {
            eprintln!("Unrecognized command: {}", unk);
            print_usage(&program);
            std::process::exit(2);
        }
    }
}
