use anyhow::Result;
use axum::serve;
use clap::Parser;
use docflow_core::{
    auth::{Hs256Resolver, IdentityResolver},
    Engine, EngineConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Document lifecycle engine: catalog, permissions, versions and request workflows")]
struct Cli {
    /// Listen address
    #[arg(short, long, env = "DOCFLOW_ADDR", default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// Directory holding the table file
    #[arg(short, long, env = "DOCFLOW_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory for the search index; kept in RAM when unset
    #[arg(short, long, env = "DOCFLOW_INDEX_DIR")]
    index_dir: Option<PathBuf>,
}

struct Config {
    engine: EngineConfig,
    jwt_secret: Option<String>,
}

fn load_config(cli: &Cli) -> Config {
    Config {
        engine: EngineConfig {
            data_dir: Some(cli.data_dir.clone()),
            index_dir: cli.index_dir.clone(),
        },
        jwt_secret: std::env::var("DOCFLOW_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli);

    let engine = Arc::new(Engine::open(&config.engine).await?);
    let resolver = match config.jwt_secret {
        Some(secret) => Some(Arc::new(Hs256Resolver::new(secret)) as Arc<dyn IdentityResolver>),
        None => {
            warn!("DOCFLOW_JWT_SECRET not set, accepting header identity only");
            None
        }
    };
    let app = api::router(api::AppState { engine, resolver });

    let listener = TcpListener::bind(cli.addr).await?;
    info!("Listening on {}", cli.addr);
    serve(listener, app.into_make_service()).await?;
    Ok(())
}
