//! shrd-ctl — command-line client for the shrd device registry and
//! transfer operations.

use std::sync::Arc;

use anyhow::{Context, Result};

use shrd_services::{Event, EventBus, Store};

mod cmd;

fn print_usage() {
    println!("Usage: shrd-ctl [--config-dir <dir>] <command>");
    println!();
    println!("Node");
    println!("  info                            Identity, port, and pairing code");
    println!();
    println!("Devices");
    println!("  devices                         List enrolled devices");
    println!("  add <id> <name> <host> [port]   Enroll a device manually");
    println!("  remove <device>                 Remove an enrolled device");
    println!("  ping <device>                   Check whether a device answers");
    println!();
    println!("Transfers");
    println!("  send <device> <file>            Send a local file to a device");
    println!("  ls <device> [path]              List a remote directory");
    println!("  download <device> <path>        Fetch a remote file by absolute path");
    println!();
    println!("<device> may be an id, an id prefix, or a device name.");
    println!();
    println!("Examples:");
    println!("  shrd-ctl devices");
    println!("  shrd-ctl send laptop ~/notes.txt");
    println!("  shrd-ctl ls laptop /home/alice");
    println!("  shrd-ctl download laptop /home/alice/notes.txt");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --config-dir option
    let mut config_dir = None;
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config-dir" {
            i += 1;
            config_dir = Some(args.get(i).context("--config-dir requires a value")?.clone());
        } else {
            remaining.push(args[i].clone());
        }
        i += 1;
    }

    let store = Arc::new(match config_dir {
        Some(dir) => Store::open(dir)?,
        None => Store::open_default()?,
    });

    // Surface retry attempts while an operation runs; everything else
    // the commands report themselves.
    let (events, mut event_rx) = EventBus::channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Event::ConnectionRetry {
                device_name,
                attempt,
                max,
            } = event
            {
                eprintln!("Connection to {device_name} failed (attempt {attempt}/{max}), retrying...");
            }
        }
    });

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();
    match remaining_refs.as_slice() {
        ["info"] | [] => cmd::node::cmd_info(&store),
        ["devices"] => cmd::node::cmd_devices(&store),
        ["add", id, name, host] => cmd::node::cmd_add(&store, id, name, host, None),
        ["add", id, name, host, port] => cmd::node::cmd_add(&store, id, name, host, Some(port)),
        ["remove", device] => cmd::node::cmd_remove(&store, device),
        ["ping", device] => cmd::transfer::cmd_ping(store, events, device).await,
        ["send", device, path] => cmd::transfer::cmd_send(store, events, device, path).await,
        ["ls", device] => cmd::transfer::cmd_ls(store, events, device, "").await,
        ["ls", device, path] => cmd::transfer::cmd_ls(store, events, device, path).await,
        ["download", device, path] => {
            cmd::transfer::cmd_download(store, events, device, path).await
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
