//! The command-line driver (spec.md §1, §6: "out of scope / external
//! collaborators"; only its exit-code contract is load-bearing for the
//! core). Thin: every subcommand either writes a config file, manages
//! wallet files, or hands off to `corechain_node::run_node`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use corechain_config::CorechainConfig;
use corechain_wallet::WalletStore;
use tokio::runtime::Runtime;

#[derive(Parser)]
#[command(name = "corechain", version, about = "corechain node CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a fresh devnet config file.
    Init {
        #[arg(long, default_value = "config/corechain.toml")]
        config: PathBuf,
    },
    /// Run the node.
    Node {
        #[command(subcommand)]
        cmd: NodeCmd,
    },
    /// Wallet file management.
    Wallet {
        #[command(subcommand)]
        cmd: WalletCmd,
    },
}

#[derive(Subcommand)]
enum NodeCmd {
    Start {
        #[arg(long, default_value = "config/corechain.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum WalletCmd {
    New {
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long)]
        password: String,
    },
    List,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.to_string().contains("lock held") => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { config } => init_config(config),
        Commands::Node { cmd } => match cmd {
            NodeCmd::Start { config } => {
                let rt = Runtime::new()?;
                rt.block_on(async move { corechain_node::run_node(config).await })
            }
        },
        Commands::Wallet { cmd } => match cmd {
            WalletCmd::New { name, password } => {
                let store = WalletStore::new(wallet_dir()?)?;
                let wallet = store.create(&name, &password)?;
                println!(
                    "created wallet {} address {}",
                    wallet.name,
                    corechain_crypto::address_to_string(&wallet.address)
                );
                Ok(())
            }
            WalletCmd::List => {
                let store = WalletStore::new(wallet_dir()?)?;
                for w in store.list()? {
                    println!("{} -> {}", w.name, corechain_crypto::address_to_string(&w.address));
                }
                Ok(())
            }
        },
    }
}

fn init_config(path: PathBuf) -> Result<()> {
    if path.exists() {
        println!("config already exists at {path:?}");
        return Ok(());
    }
    let cfg = CorechainConfig::example();
    let Some(parent) = path.parent() else {
        anyhow::bail!("bad config path: {path:?}");
    };
    std::fs::create_dir_all(parent)?;
    std::fs::write(&path, toml::to_string_pretty(&cfg)?)?;
    println!("wrote config to {path:?}");
    Ok(())
}

fn wallet_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".corechain")
        .join("wallets");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
