use clap::Parser;
use nettox::config::Config;
use nettox::Proxy;

#[derive(Parser)]
#[command(name = "nettox", about = "TCP fault-injection proxy")]
struct Cli {
    /// Path to TOML config file with proxy definitions
    #[arg(long)]
    config: Option<String>,

    /// Name for the ad-hoc proxy defined by --listen/--upstream
    #[arg(long, default_value = "nettox")]
    name: String,

    /// Listen address for an ad-hoc proxy
    #[arg(long)]
    listen: Option<String>,

    /// Upstream address for an ad-hoc proxy
    #[arg(long)]
    upstream: Option<String>,

    /// Reject unknown fields in toxic JSON payloads
    #[arg(long)]
    strict: bool,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nettox=info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let mut proxies: Vec<Proxy> = Vec::new();

    if let Some(ref path) = cli.config {
        proxies.extend(Config::from_toml_file(path)?.build_proxies());
    }

    if let (Some(listen), Some(upstream)) = (cli.listen, cli.upstream) {
        let mut builder = Proxy::builder()
            .name(cli.name)
            .listen(listen)
            .upstream(upstream);
        if cli.strict {
            builder = builder.strict();
        }
        proxies.push(builder.build());
    }

    if proxies.is_empty() {
        anyhow::bail!("nothing to run: pass --config or --listen/--upstream");
    }

    for proxy in &proxies {
        proxy.start().await?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    for proxy in &proxies {
        proxy.stop().await;
    }
    Ok(())
}
