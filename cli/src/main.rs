//! rpclink CLI: talk JSON-RPC over WebSocket from the terminal.
//!
//! Usage:
//! ```bash
//! # Send a request and print the result
//! rpclink request --url ws://localhost:8080 --method math.add --params '[1, 2]'
//!
//! # Fire an event
//! rpclink event --url ws://localhost:8080 --method log --params '["hello"]'
//!
//! # Print every inbound message until the server hangs up
//! rpclink listen --url ws://localhost:8080
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rpclink_core::{
    ClientConfig, ClientCore, Event, MessageEvent, Notification, NotificationFilter,
    NotificationKind, Request, NO_ERROR,
};
use rpclink_ws::WsChannel;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "request" => cmd_request(&args[2..]).await,
        "event" => cmd_event(&args[2..]).await,
        "listen" => cmd_listen(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("rpclink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("rpclink {}", env!("CARGO_PKG_VERSION"));
    println!("Send JSON-RPC requests and events over WebSocket\n");
    println!("USAGE:");
    println!("    rpclink <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    request    Send a request and print its result");
    println!("    event      Send a one-way event");
    println!("    listen     Print inbound messages until disconnected");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>          WebSocket endpoint  [required]");
    println!("    --method <NAME>      Method name         [request, event]");
    println!("    --params <JSON>      Params array or object");
    println!("    --id <N>             Request id          [default: 1]");
    println!("    --timeout-ms <N>     Reply timeout       [default: 5000]\n");
    println!("Set RUST_LOG=debug for protocol logs.");
}

async fn connect(args: &[String], timeout: Duration) -> Result<ClientCore> {
    let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url is required"))?;
    let config = ClientConfig::new(Arc::new(WsChannel::default_for(url.clone())))
        .with_message_timeout(timeout)
        .with_message_check_interval(timeout.min(Duration::from_millis(250)));
    let client = ClientCore::new(config)?;
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(client)
}

async fn cmd_request(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params = parse_params(args)?;
    let id: i64 = match parse_flag(args, "--id") {
        Some(raw) => raw.parse().context("--id must be an integer")?,
        None => 1,
    };
    let timeout_ms: u64 = match parse_flag(args, "--timeout-ms") {
        Some(raw) => raw.parse().context("--timeout-ms must be an integer")?,
        None => 5_000,
    };
    if timeout_ms == 0 {
        bail!("--timeout-ms must be greater than zero");
    }

    let client = connect(args, Duration::from_millis(timeout_ms)).await?;
    let outcome = client.send_request(Request::new(id, method, params)).await;
    client.disconnect();

    let reply = outcome?;
    println!("{}", serde_json::to_string_pretty(&reply.result)?);
    Ok(())
}

async fn cmd_event(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params = parse_params(args)?;

    let client = connect(args, Duration::from_secs(5)).await?;
    let status = client.send_event(Event::new(method, params));
    client.disconnect();

    if !status.is(&NO_ERROR) {
        bail!("event not sent: {status}");
    }
    println!("sent");
    Ok(())
}

async fn cmd_listen(args: &[String]) -> Result<()> {
    let client = connect(args, Duration::from_secs(5)).await?;
    let mut sub = client.subscribe(NotificationFilter::only([
        NotificationKind::Message,
        NotificationKind::Disconnected,
    ]));
    eprintln!("listening on {} (Ctrl-C to stop)", parse_flag(args, "--url").unwrap_or_default());

    loop {
        tokio::select! {
            notification = sub.recv() => match notification {
                Some(Notification::Message(MessageEvent::Classified(message))) => {
                    println!("[{}] {}", message.kind(), message.to_value()?);
                }
                Some(Notification::Message(MessageEvent::Correlated(raw))) => {
                    println!("[correlated] {raw}");
                }
                Some(Notification::Disconnected(event)) => {
                    eprintln!("disconnected (code {:?}): {}", event.code, event.reason);
                    return Ok(());
                }
                Some(_) => {}
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                client.disconnect();
                return Ok(());
            }
        }
    }
}

fn parse_params(args: &[String]) -> Result<Option<Value>> {
    let Some(raw) = parse_flag(args, "--params") else {
        return Ok(None);
    };
    let params: Value = serde_json::from_str(&raw).context("--params must be valid JSON")?;
    if !params.is_array() && !params.is_object() {
        bail!("--params must be a JSON array or object");
    }
    Ok(Some(params))
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
