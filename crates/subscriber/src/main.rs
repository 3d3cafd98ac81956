//! subscriber - groupcast client
//!
//! One-shot commands go through the gateway. `listen` keeps the user online
//! and prints every post gossiped to them until interrupted.

use anyhow::Context;
use clap::Parser;
use groupcast_core::seen::SeenTable;
use groupcast_core::types::AuthMessage;
use groupcast_net::{Disseminator, PortLayout};
use std::process::ExitCode;
use std::sync::Arc;
use subscriber::config::{Cli, Command, ListenArgs};
use subscriber::relay::{bind_gossip_listener, RelayEngine, GOSSIP_PORT_RANGE};
use subscriber::session::SessionLink;
use subscriber::{GatewayClient, Login};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Ports tried before giving up on the gossip listener
const BIND_ATTEMPTS: usize = 32;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("subscriber=info".parse().unwrap());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    cli.validate()?;
    let client = GatewayClient::new(&cli.gateway, cli.request_timeout())?;

    match cli.command {
        Command::Register { username } => match client.register(&username).await? {
            Login::Registered => println!("Registered new user {}", username),
            Login::Existing => println!("Logged in existing user {}", username),
        },
        Command::Groups => {
            for group in client.groups().await? {
                println!(
                    "{} (created by {}): {} members, {} posts",
                    group.name,
                    group.creator,
                    group.members.len(),
                    group.posts.len()
                );
                for post in &group.posts {
                    println!("  {}: {}", post.author, post.body);
                }
            }
        }
        Command::Create { username, group } => {
            client.create_group(&username, &group).await?;
            println!("Created group {}", group);
        }
        Command::Join { username, group } => {
            client.join_group(&username, &group).await?;
            println!("Joined group {}", group);
        }
        Command::Post {
            username,
            group,
            body,
        } => {
            client.write_post(&username, &group, &body).await?;
            println!("Posted to {}", group);
        }
        Command::Listen(args) => listen(&client, args).await?,
    }
    Ok(())
}

async fn listen(client: &GatewayClient, args: ListenArgs) -> anyhow::Result<()> {
    match client.register(&args.username).await? {
        Login::Registered => info!("Registered new user {}", args.username),
        Login::Existing => info!("Logged in existing user {}", args.username),
    }

    let listener = bind_gossip_listener(args.gossip_host, GOSSIP_PORT_RANGE, BIND_ATTEMPTS)
        .await
        .context("no free gossip port")?;
    let listen_port = listener.local_addr()?.port();
    info!("Receiving gossip on port {}", listen_port);

    let (shutdown_tx, _) = broadcast::channel(1);
    let (deliveries_tx, mut deliveries) = mpsc::channel(64);
    let engine = Arc::new(RelayEngine::new(
        SeenTable::default(),
        Disseminator::new(args.gossip_timeout()),
        deliveries_tx,
    ));
    tokio::spawn(engine.clone().serve(listener, shutdown_tx.subscribe()));

    let layout = PortLayout::default();
    let auth = AuthMessage {
        username: args.username.clone(),
        listen_port,
    };
    for replica in &args.replica {
        match SessionLink::new(*replica, &layout, auth.clone(), args.gossip_timeout()) {
            Some(link) => {
                tokio::spawn(link.run());
            }
            None => warn!("Replica {} has no session port", replica),
        }
    }

    loop {
        tokio::select! {
            delivered = deliveries.recv() => {
                match delivered {
                    Some(post) => println!("[{}] {}", post.id, post.body),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    let stats = engine.stats();
    info!(
        "Received {} gossip messages, delivered {}, relayed {}",
        stats.received, stats.delivered, stats.relayed
    );
    Ok(())
}
