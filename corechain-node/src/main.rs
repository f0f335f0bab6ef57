use corechain_node::run_node;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::var("CORECHAIN_CONFIG").unwrap_or_else(|_| "config/corechain.toml".to_string());
    if let Err(e) = run_node(PathBuf::from(path)).await {
        eprintln!("node failed: {e:?}");
        return ExitCode::from(if e.to_string().contains("lock held") { 2 } else { 1 });
    }
    ExitCode::SUCCESS
}
