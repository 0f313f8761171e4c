use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing_subscriber::EnvFilter;

use mfshare::{
    config::{NetConfig, Params, Role},
    input,
    net::network::{DealerNetwork, PartyNetwork},
    protocols::session::{run_dealer, run_party},
};

/// Private matrix-factorization updates between a dealer and two compute parties.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Which role this process plays
    #[arg(long, value_enum)]
    role: Role,

    /// Address the dealer listens on
    #[arg(long, default_value = "127.0.0.1:9002")]
    dealer: SocketAddr,

    /// Address P1 listens on for P0
    #[arg(long, default_value = "127.0.0.1:9001")]
    peer: SocketAddr,

    /// JSON file with model parameters, overridden by the flags below
    #[arg(long)]
    params: Option<PathBuf>,

    #[arg(long)]
    features: Option<usize>,

    #[arg(long)]
    users: Option<usize>,

    #[arg(long)]
    items: Option<usize>,

    /// Upper bound for sampled randomness
    #[arg(long)]
    bound: Option<i64>,

    /// Do not reject replayed query records
    #[arg(long)]
    no_reuse_guard: bool,

    /// Initial model, read by the dealer
    #[arg(long, default_value = "inputs/initial_matrix.txt")]
    model: PathBuf,

    /// Queries, read by the dealer
    #[arg(long, default_value = "inputs/queries.txt")]
    queries: PathBuf,

    /// Seed the dealer's randomness for a reproducible session
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn params(&self) -> anyhow::Result<Params> {
        let mut params = match &self.params {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&text).context("failed to parse params")?
            }
            None => Params::default(),
        };
        if let Some(features) = self.features {
            params.features = features;
        }
        if let Some(users) = self.users {
            params.users = users;
        }
        if let Some(items) = self.items {
            params.items = items;
        }
        if let Some(bound) = self.bound {
            params.bound = bound;
        }
        if self.no_reuse_guard {
            params.guard_reuse = false;
        }
        params.validate()?;
        Ok(params)
    }

    fn net(&self) -> NetConfig {
        NetConfig {
            dealer: self.dealer,
            peer: self.peer,
            ..NetConfig::default()
        }
    }
}

async fn dealer(cli: &Cli, params: Params) -> anyhow::Result<()> {
    let model = input::load_model(&cli.model, &params)?;
    let queries = input::load_queries(&cli.queries, &params)?;
    let mut rng = match cli.seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    };

    let mut network = DealerNetwork::listen(cli.dealer).await?;
    let report = run_dealer(&mut network, &params, &model, &queries, &mut rng).await?;

    for (party, share) in report.shares.iter().enumerate() {
        println!("User matrix share from P{party}:\n{share}");
    }
    println!("Updated user matrix:\n{}", report.reconstruct()?);
    Ok(())
}

async fn party(cli: &Cli, params: Params) -> anyhow::Result<()> {
    let mut network = PartyNetwork::connect(cli.role, &cli.net()).await?;
    let users = run_party(&mut network, params).await?;
    tracing::debug!("Final user matrix share:\n{users}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let params = cli.params()?;
    tracing::info!(role = %cli.role, ?params, "Starting");

    match cli.role {
        Role::Dealer => dealer(&cli, params).await,
        Role::P0 | Role::P1 => party(&cli, params).await,
    }
    .with_context(|| format!("{} failed", cli.role))
}
