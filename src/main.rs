// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, U256};
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::RpcModule;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod bundler;
mod chain;
mod config;
mod encoder;
mod error;
mod ledger;
mod paymaster;
mod relay;
mod rpc;
mod signer;
mod types;

use crate::bundler::HttpBundlerClient;
use crate::chain::EthChainReader;
use crate::config::RelayConfig;
use crate::ledger::MemoryLedger;
use crate::paymaster::HttpPaymasterClient;
use crate::relay::Relay;
use crate::rpc::RelayRpcImpl;
use crate::signer::OpSigner;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:8545")]
    rpc_server_addr: String,

    /// Custodial operator key; keep it out of shell history via .env.
    #[clap(long)]
    operator_key: String,

    #[clap(long)]
    chain_id: u64,

    #[clap(long)]
    eth_rpc_url: String,

    #[clap(long)]
    paymaster_url: String,

    #[clap(long)]
    bundler_url: String,

    /// Canonical ERC-4337 entry point address.
    #[clap(long)]
    entry_point: String,

    /// Backend smart account used as the sender of every relayed operation.
    #[clap(long)]
    account: String,

    /// ERC-20 token contract moved by withdrawals and prizes.
    #[clap(long)]
    token: String,

    #[clap(long)]
    fee_recipient: String,

    /// Fixed withdrawal fee in token base units.
    #[clap(long, default_value = "500000")]
    withdrawal_fee: String,

    /// Per-transaction maximum amount in token base units.
    #[clap(long, default_value = "1000000000")]
    max_amount: String,

    #[clap(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    #[clap(long, default_value_t = 30)]
    poll_attempts: u32,

    #[clap(long, default_value_t = 30000)]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command line arguments
    let args = Args::parse();

    let config = Arc::new(RelayConfig {
        chain_id: args.chain_id,
        entry_point: parse_address(&args.entry_point, "entry point")?,
        account: parse_address(&args.account, "backend account")?,
        token: parse_address(&args.token, "token")?,
        fee_recipient: parse_address(&args.fee_recipient, "fee recipient")?,
        withdrawal_fee: U256::from_dec_str(&args.withdrawal_fee)
            .context("invalid withdrawal fee")?,
        max_amount: U256::from_dec_str(&args.max_amount).context("invalid maximum amount")?,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        poll_attempts: args.poll_attempts,
        request_timeout: Duration::from_millis(args.request_timeout_ms),
    });

    let provider = Arc::new(
        Provider::<Http>::try_from(args.eth_rpc_url.as_str()).context("invalid chain RPC url")?,
    );
    let chain = Arc::new(EthChainReader::new(
        provider,
        config.entry_point,
        config.account,
        config.token,
    ));

    let wallet: LocalWallet = args.operator_key.parse().context("invalid operator key")?;
    let op_signer = OpSigner::new(wallet, config.entry_point, config.chain_id);
    info!(operator = %op_signer.operator_address(), account = %config.account, "relay identity");

    let paymaster = Arc::new(HttpPaymasterClient::new(
        &args.paymaster_url,
        config.entry_point,
        config.request_timeout,
    )?);
    let bundler = Arc::new(HttpBundlerClient::new(
        &args.bundler_url,
        config.entry_point,
        config.poll_interval,
        config.poll_attempts,
        config.request_timeout,
    )?);
    let ledger = Arc::new(MemoryLedger::new(config.max_amount));

    let relay = Arc::new(Relay::new(
        config.clone(),
        chain,
        op_signer,
        paymaster,
        bundler,
        ledger,
    ));

    // Create the JSON-RPC server
    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    let relay_rpc = RelayRpcImpl::new(relay);

    info!(
        "Starting gasless relay RPC server on {} (confirmation bound {:?})",
        server_addr,
        config.confirmation_bound()
    );

    // Start the JSON-RPC server
    let server_handle = start_server(server_addr, relay_rpc).await?;

    // Keep the server running until Ctrl+C is pressed
    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

fn parse_address(raw: &str, what: &str) -> anyhow::Result<Address> {
    raw.parse::<Address>()
        .with_context(|| format!("invalid {what} address: {raw}"))
}

async fn start_server(
    server_addr: SocketAddr,
    relay_rpc: RelayRpcImpl,
) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;

    let mut module = RpcModule::new(relay_rpc);
    rpc::register_methods(&mut module)?;
    let server_handle = server.start(module);

    Ok(server_handle)
}
