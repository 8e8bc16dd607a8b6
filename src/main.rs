use std::{error::Error, fs::read_to_string, process, time::Duration};

use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use log::{error, info};
use lifeline::{
    config::{Network, ServerConfig, ServerSettings},
    is_prefork_child,
    server::http::{handler_fn, HttpEngine},
    Lifeline,
};

#[derive(Parser)]
#[command(name = "lifeline", version, about = "lifeline - serve with prefork workers and graceful shutdown")]
struct Args {
    #[arg(short, long, help = "Settings file to use.")]
    config: Option<String>,

    #[arg(short, long, help = "Address to bind, host:port or a socket path.")]
    addr: Option<String>,

    #[arg(short, long, help = "Network family: tcp, tcp4, tcp6 or unix.")]
    network: Option<Network>,

    #[arg(long, help = "Run one worker process per core.")]
    prefork: bool,

    #[arg(long, help = "Set SO_REUSEPORT on the listening socket.")]
    reuseport: bool,

    #[arg(long, help = "Stop gracefully on SIGINT/SIGTERM.")]
    graceful: bool,

    #[arg(long, help = "Seconds to wait for open connections on shutdown.")]
    shutdown_timeout: Option<u64>,
}

fn load_config(args: &Args) -> Result<ServerConfig, Box<dyn Error>> {
    let mut builder = ServerConfig::builder();

    if let Some(path) = &args.config {
        let document = read_to_string(path)?;
        builder = ServerSettings::from_toml(&document)?.apply(builder)?;
    }

    if let Some(addr) = &args.addr {
        builder = builder.addr(addr);
    }
    if let Some(network) = args.network {
        builder = builder.network(network);
    }
    if args.prefork {
        builder = builder.prefork(true);
    }
    if args.reuseport {
        builder = builder.reuseport(true);
    }
    if args.graceful {
        builder = builder.graceful_shutdown(true);
    }

    Ok(builder.build()?)
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;

    let mut engine = HttpEngine::new(handler_fn(|_request| async move {
        let body = format!("Hello from process {}\n", process::id());
        Ok(http::Response::new(Full::new(Bytes::from(body))))
    }));
    if let Some(seconds) = args.shutdown_timeout {
        engine = engine.with_shutdown_timeout(Duration::from_secs(seconds));
    }

    if !is_prefork_child() {
        info!("Server listening on {} ({})", config.addr(), config.network());
    }

    Lifeline::new(config, engine)
        .listen_and_serve()
        .await?;

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    // Prefork workers each own a single core.
    let runtime = if is_prefork_child() {
        tokio::runtime::Builder::new_current_thread()
    } else {
        tokio::runtime::Builder::new_multi_thread()
    }
    .enable_all()
    .build();

    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        error!("Server stopped with error: {}", e);
        process::exit(1);
    }
}
