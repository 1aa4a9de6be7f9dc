//! Callwire RPC - demo host and client over TCP.
//!
//! `serve` hosts a small calculator service with a `Ticked` event;
//! `call` connects to a host and invokes one of its methods.

mod service;

use anyhow::Result;
use callwire_core::{
    ClientConfig, ClientSession, Dispatcher, MessagePackFormatter, RemoteProxy, RetryPolicy,
    RpcServer, ServerConfig, StaticTokenValidator, TcpTransport, TcpTransportListener,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "callwire-rpc")]
#[command(about = "Demo host and client for the callwire protocol")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Disable the encrypted session handshake
    #[arg(long, global = true)]
    no_encryption: bool,

    /// Use MessagePack payloads instead of JSON
    #[arg(long, global = true)]
    msgpack: bool,

    /// Authorization token (required by the host when given to `serve`)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host the demo calculator service
    Serve {
        /// Address to bind (port 0 = auto-assign)
        #[arg(long, default_value = "127.0.0.1:0")]
        bind: String,

        /// Maximum concurrent clients
        #[arg(long, default_value = "16")]
        max_clients: usize,

        /// Seconds between `Ticked` events (0 = never)
        #[arg(long, default_value = "0")]
        tick: u64,
    },
    /// Call the demo service on a running host
    Call {
        /// Host address
        #[arg(long)]
        connect: String,

        /// Add two integers
        #[arg(long, num_args = 2, value_names = ["A", "B"], conflicts_with = "echo")]
        add: Option<Vec<i64>>,

        /// Echo a string
        #[arg(long)]
        echo: Option<String>,

        /// Stay connected and print `Ticked` events for this many seconds
        #[arg(long, default_value = "0")]
        listen: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match &args.command {
        Command::Serve {
            bind,
            max_clients,
            tick,
        } => serve(&args, bind, *max_clients, *tick).await,
        Command::Call {
            connect,
            add,
            echo,
            listen,
        } => call(&args, connect, add.as_deref(), echo.as_deref(), *listen).await,
    }
}

async fn serve(args: &Args, bind: &str, max_clients: usize, tick: u64) -> Result<()> {
    let mut config = ServerConfig::new()
        .with_encryption(!args.no_encryption)
        .with_max_clients(max_clients);
    if args.msgpack {
        config = config.with_formatter(Arc::new(MessagePackFormatter));
    }
    if let Some(token) = &args.token {
        config = config.with_validator(Arc::new(StaticTokenValidator::new([token.clone()])));
    }

    let (definition, hub) = service::calculator();
    let listener = TcpTransportListener::bind(bind).await?;
    let addr = listener.local_addr();
    let mut handle = RpcServer::start(listener, Arc::new(Dispatcher::new(definition)), config);

    // Print port for scripts to read (intentional stdout)
    println!("RPC_PORT={}", addr.port());
    info!("Serving calculator on {}", addr);

    let ticker = (tick > 0).then(|| service::spawn_ticker(hub, Duration::from_secs(tick)));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    if let Some(ticker) = ticker {
        ticker.abort();
    }
    handle.shutdown();
    Ok(())
}

async fn call(
    args: &Args,
    connect: &str,
    add: Option<&[i64]>,
    echo: Option<&str>,
    listen: u64,
) -> Result<()> {
    let mut config = ClientConfig::new().with_encryption(!args.no_encryption);
    if args.msgpack {
        config = config.with_formatter(Arc::new(MessagePackFormatter));
    }
    if let Some(token) = &args.token {
        config = config.with_authorization_token(token.clone());
    }

    let session = ClientSession::new(Arc::new(TcpTransport::client(connect)), config);
    // The host may still be starting.
    RetryPolicy::new()
        .with_transient_errors()
        .with_max_retries(5)
        .with_initial_delay(Duration::from_millis(100))
        .execute(|| session.connect())
        .await?;
    let proxy = RemoteProxy::new(session.clone());

    if let Some([a, b]) = add {
        let sum: i64 = proxy.call("Add", (*a, *b)).await?;
        println!("{}", sum);
    }
    if let Some(text) = echo {
        let reply: String = proxy.call("Echo", (text.to_string(),)).await?;
        println!("{}", reply);
    }

    if listen > 0 {
        proxy.add_event_handler("Ticked", |(count,): (u64,)| println!("tick {}", count));
        tokio::time::sleep(Duration::from_secs(listen)).await;
    }

    session.disconnect().await;
    Ok(())
}
