use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "chain-p2p")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "startnode", about = "Start a network node")]
    StartNode {
        #[arg(long, help = "Port to listen on (overrides the configured address)")]
        port: Option<u16>,
        #[arg(
            long = "bootstrap",
            value_delimiter = ',',
            help = "Bootstrap node addresses, e.g. 127.0.0.1:3001"
        )]
        bootstrap: Vec<String>,
        #[arg(long, help = "Path to a TOML configuration file")]
        config: Option<PathBuf>,
        #[arg(
            long = "status-interval",
            default_value_t = 30,
            help = "Seconds between status reports"
        )]
        status_interval: u64,
    },
    #[command(name = "sendtx", about = "Send a transaction to a running node")]
    SendTx {
        #[arg(long, help = "Address of the receiving node")]
        node: String,
        #[arg(long, help = "Transaction payload")]
        data: String,
    },
    #[command(name = "printchain", about = "Print all blocks stored by a node")]
    Printchain {
        #[arg(long, help = "Port of the node whose ledger to print")]
        port: u16,
    },
}
