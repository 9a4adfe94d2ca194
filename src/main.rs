use chain_p2p::config::NodeConfig;
use chain_p2p::network::message::TxPayload;
use chain_p2p::network::{Packet, Server, TcpTransport, Transport};
use chain_p2p::storage::{SledLedger, StoredTransaction};
use chain_p2p::utils::PeriodicTask;
use chain_p2p::{BlockRecord, Command, Ledger, Opt, TransactionRecord};
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, warn, LevelFilter};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::StartNode {
            port,
            bootstrap,
            config,
            status_interval,
        } => start_node(port, bootstrap, config, status_interval)?,
        Command::SendTx { node, data } => {
            let config = NodeConfig::new();
            let tx = StoredTransaction::new(data.as_bytes());
            let packet = Packet::Tx(TxPayload {
                addr_from: config.node_address.clone(),
                transaction: tx.serialize()?,
            });

            let transport = TcpTransport::new(config.connect_timeout(), config.io_timeout());
            transport.send(&node, &packet.to_message()?)?;
            println!("Sent transaction {} to {node}", HEXLOWER.encode(&tx.id()));
        }
        Command::Printchain { port } => {
            let mut config = NodeConfig::new();
            config.set_port(port);
            let ledger = SledLedger::open(&config.node_data_dir())?;

            for block in ledger.blocks()? {
                println!("Pre block hash: {}", HEXLOWER.encode(block.get_pre_block_hash()));
                println!("Cur block hash: {}", HEXLOWER.encode(&block.hash()));
                println!("Cur block height: {}", block.height());
                println!("Cur block Timestamp: {}", block.get_timestamp());
                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", HEXLOWER.encode(tx.get_id()));
                    println!("-- Data = {}", String::from_utf8_lossy(tx.get_data()));
                }
                println!()
            }
        }
    }
    Ok(())
}

fn start_node(
    port: Option<u16>,
    bootstrap: Vec<String>,
    config_path: Option<PathBuf>,
    status_interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => NodeConfig::from_file(&path)?,
        None => NodeConfig::new(),
    };
    if let Some(port) = port {
        config.set_port(port);
    }
    if !bootstrap.is_empty() {
        config.bootstrap_nodes = bootstrap;
    }
    config.validate()?;

    let ledger = Arc::new(SledLedger::open(&config.node_data_dir())?);
    info!(
        "Opened ledger at {} (height {})",
        ledger.get_db_path().display(),
        ledger.best_height()?
    );

    let server = Arc::new(Server::new(&config, ledger)?);
    let listener = TcpListener::bind(&config.node_address)
        .map_err(|e| format!("Failed to bind to {}: {e}", config.node_address))?;

    // join the network once the listener can take replies
    let joiner = Arc::clone(&server);
    thread::spawn(move || {
        match joiner.bootstrap(&[]) {
            Ok(count) => info!("Joined the network through {count} bootstrap nodes"),
            Err(e) => warn!("Bootstrap failed: {e}"),
        }
        if let Err(e) = joiner.sync_manager().start_sync() {
            warn!("Initial sync failed: {e}");
        }
    });

    let reporter = Arc::clone(&server);
    let _status = PeriodicTask::spawn(
        "status-report",
        Duration::from_secs(status_interval.max(1)),
        move || match serde_json::to_string(&reporter.get_node_info()) {
            Ok(status) => println!("{status}"),
            Err(e) => warn!("Failed to encode node status: {e}"),
        },
    );

    server.serve(listener)?;
    Ok(())
}
