use clap::{Parser, Subcommand};

/// Custodial crypto purchase service — IDR payments in, native tokens
/// out of the hot wallet.
#[derive(Parser)]
#[command(name = "kios", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server, scheduler, and payout workers
    Serve,

    /// Run the order expiry sweep once and exit
    SweepExpired,

    /// Encrypt a signing key (or ENV:<NAME> indirection) for chain
    /// registration; reads the key from stdin
    EncryptKey,
}
