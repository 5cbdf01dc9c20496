//! `ledgerd`: a thin CLI wrapper around `chain-core`. Wires up logging,
//! configuration and a key-value backend, then drives a root chain
//! instance (with its sub-chain manager as the event sink) through block
//! production. There is no gossip layer here: `chain_core::BlockBroadcaster`
//! is the seam a real P2P transport would plug into.

mod config;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kvstore::{KvStore, MemoryStore, SledStore};
use shared::{Address, KeyPair, Network, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chain_core::subchain::SubchainManager;
use chain_core::{BlockBroadcaster, BlockProducer, ChainProcessor, NoopBroadcaster, Sealing};

use config::NodeConfig;

#[derive(Parser)]
#[command(
    name = "ledgerd",
    version,
    about = "UTXO blockchain node with PoA/PoW consensus and sub-chain support"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing keypair and print its address.
    Keygen,
    /// Open (or create) chain state from a config file and mine blocks.
    Run(RunArgs),
    /// Print version information.
    Version,
}

#[derive(Parser)]
struct RunArgs {
    /// Path to a TOML node configuration file. Uses protocol defaults if omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of blocks to mine before exiting.
    #[arg(long, default_value_t = 5)]
    blocks: u64,
    /// Address credited with each block's coinbase reward. A fresh keypair
    /// is generated and discarded if omitted.
    #[arg(long)]
    reward_address: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Keygen => {
            init_logging("info");
            run_keygen();
            Ok(())
        }
        Commands::Version => {
            println!("ledgerd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(args) => {
            let node_config = match &args.config {
                Some(path) => NodeConfig::load(path)?,
                None => NodeConfig::default(),
            };
            init_logging(&node_config.log_level);
            run_node(node_config, args)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_keygen() {
    let keypair = KeyPair::generate();
    let address = Address::from_compressed_pubkey(keypair.public_key().as_bytes());
    println!("public_key    = {}", hex::encode(keypair.public_key().as_bytes()));
    println!("address(hex)  = {address}");
    if let Ok(bech32) = address.encode(Network::Testnet.hrp()) {
        println!("address(tkgx) = {bech32}");
    }
}

fn open_store(node_config: &NodeConfig) -> Result<Arc<dyn KvStore>> {
    match &node_config.data_dir {
        Some(dir) => {
            let store = SledStore::open(dir)
                .map_err(|e| shared::Error::BackendFailure(format!("opening sled store: {e}")))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

static MINING_CANCEL: AtomicBool = AtomicBool::new(false);

fn run_node(node_config: NodeConfig, args: &RunArgs) -> Result<()> {
    let store = open_store(&node_config)?;
    let params = node_config.protocol_params()?;
    let policy = node_config.subchain_policy();
    let sync_filter = node_config.sync_filter()?;

    let sink = SubchainManager::new(store.clone(), policy, sync_filter);
    let mut processor = ChainProcessor::open(store, params, sink)?;
    processor.sink_mut().restore_chains()?;

    info!(
        height = processor.height(),
        tip = %processor.tip().hash(),
        sub_chains = processor.sink().list_chains().len(),
        "chain opened"
    );

    let reward_keypair;
    let reward_address = match &args.reward_address {
        Some(addr) => Address::parse(addr)?,
        None => {
            reward_keypair = KeyPair::generate();
            Address::from_compressed_pubkey(reward_keypair.public_key().as_bytes())
        }
    };

    let broadcaster: Box<dyn BlockBroadcaster> = Box::new(NoopBroadcaster);
    let mining_keypair = KeyPair::generate();
    let mempool = chain_core::Mempool::new();

    for _ in 0..args.blocks {
        let producer = BlockProducer::new(processor.params(), processor.consensus());
        let recent = processor.recent_headers(64).to_vec();
        let sealing = match processor.params().consensus.kind() {
            chain_core::ConsensusKind::ProofOfAuthority => Sealing::Authority(&mining_keypair),
            chain_core::ConsensusKind::ProofOfWork => Sealing::Work(&MINING_CANCEL),
        };
        let block = producer.produce_block(
            processor.tip(),
            &recent,
            processor.utxos(),
            &mempool,
            processor.current_supply(),
            &reward_address,
            sealing,
        )?;
        let height = block.header.height;
        let hash = block.header.hash();
        processor.apply_block(block.clone())?;
        broadcaster.announce(&block);
        info!(height, %hash, "block mined");
    }

    Ok(())
}
