//! prefsync: Read, edit and sync settings from the command line
//!
//! Usage:
//!   prefsync login                                   # hydrate from the server
//!   prefsync get user
//!   prefsync set user theme='"dark"' fontFamily='"Inter"'
//!   prefsync --role admin set global allowRegistration=true
//!   prefsync sync | pull | status | reset

use clap::Parser;
use prefsync::cli::{ClientArgs, ClientCommand};
use prefsync::document::{Payload, Scope};
use prefsync::identity::{Identity, Session};
use prefsync::sync::{HttpTransport, SyncClient, SyncOptions, SyncOutcome};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.to_config();
    let transport = HttpTransport::new(
        config.server.clone(),
        config.token.clone(),
        config.request_timeout(),
    )?;

    // Holding a token is what "signed in" means here.
    let session = match config.token {
        Some(_) => Session::signed_in(Identity::new("local", args.role())),
        None => Session::new(),
    };

    let client = SyncClient::start(
        Arc::new(transport),
        Arc::new(session),
        SyncOptions::from_config(&config),
    )
    .await;

    let outcome = match args.command {
        ClientCommand::Get(scope) => {
            let doc = client.get(parse_scope(&scope.scope)?).await;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            return Ok(());
        }
        ClientCommand::Set { scope, fields } => {
            let scope = parse_scope(&scope.scope)?;
            client.update_local(scope, parse_fields(&fields)?).await;
            client.sync_if_idle().await
        }
        ClientCommand::Sync => client.sync_if_idle().await,
        ClientCommand::Pull => client.pull().await,
        ClientCommand::Login => client.sync_at_login().await,
        ClientCommand::Reset => {
            client.sign_out().await;
            println!("Local settings reset");
            return Ok(());
        }
        ClientCommand::Status => {
            println!("{}", serde_json::to_string_pretty(&client.status().await)?);
            return Ok(());
        }
    };

    match outcome {
        SyncOutcome::Completed(report) => {
            println!(
                "Synced: pushed {:?}, applied {:?}",
                report.pushed, report.applied
            );
            if !report.unauthorized.is_empty() {
                eprintln!("Not allowed to push {:?}; kept locally", report.unauthorized);
                std::process::exit(2);
            }
        }
        SyncOutcome::Skipped(reason) => {
            eprintln!("Sync skipped: {:?}", reason);
        }
        SyncOutcome::Failed(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_scope(name: &str) -> Result<Scope, String> {
    Scope::from_name(name).ok_or_else(|| format!("unknown scope: {}", name))
}

/// `key=value` pairs; values are JSON, or plain strings when they don't parse.
fn parse_fields(fields: &[String]) -> Result<Payload, String> {
    let mut payload = Payload::new();
    for field in fields {
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got {}", field))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        payload.insert(key.to_string(), value);
    }
    Ok(payload)
}
