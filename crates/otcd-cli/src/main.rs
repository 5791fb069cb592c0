//! otcd-cli
//!
//! Operator/party CLI for the OTC coordinator. Drives the JSON-RPC façade
//! only — it has no direct database access, consistent with deal creation
//! itself being an external collaborator this workspace does not expose.
//!
//! Usage:
//!   otcd-cli status       --deal-id <hex> [--rpc <url>]
//!   otcd-cli fill-details --deal-id <hex> --token <hex> --payback <addr> --recipient <addr> [--email <addr>] [--rpc <url>]
//!   otcd-cli cancel       --deal-id <hex> --token <hex> [--rpc <url>]

use clap::{Parser, Subcommand};
use otcd_rpc::RpcDealStatus;

mod rpc_client;
use rpc_client::OtcRpcClient;

#[derive(Parser, Debug)]
#[command(
    name = "otcd-cli",
    version,
    about = "OTC coordinator CLI — query deal status and submit party details"
)]
struct Args {
    /// Node RPC endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8645")]
    rpc: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a deal's current status: stage, collection progress, queued
    /// transactions, and event history.
    Status {
        #[arg(long)]
        deal_id: String,
    },

    /// Submit one party's routing addresses. `token` identifies which
    /// side you are without needing to know whether you are "A" or "B".
    FillDetails {
        #[arg(long)]
        deal_id: String,
        #[arg(long)]
        token: String,
        /// Address refunds should be sent back to if the deal reverts.
        #[arg(long)]
        payback: String,
        /// Address the counterparty's asset should be delivered to.
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        email: Option<String>,
    },

    /// Cancel a deal. Only allowed before any deposit has been observed.
    Cancel {
        #[arg(long)]
        deal_id: String,
        #[arg(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,otcd_cli=info")
        .init();

    let args = Args::parse();
    let client = OtcRpcClient::new(&args.rpc);

    match args.command {
        Command::Status { deal_id } => {
            let status = client.status(&deal_id).await?;
            print_status(&status);
            Ok(())
        }

        Command::FillDetails { deal_id, token, payback, recipient, email } => {
            let status = client
                .fill_details(&deal_id, &token, &payback, &recipient, email)
                .await?;
            println!("Details submitted.");
            print_status(&status);
            Ok(())
        }

        Command::Cancel { deal_id, token } => {
            let status = client.cancel(&deal_id, &token).await?;
            println!("Deal cancelled.");
            print_status(&status);
            Ok(())
        }
    }
}

fn print_status(status: &RpcDealStatus) {
    println!("Deal:     {}", status.deal_id);
    println!("Stage:    {}", status.stage);
    if let Some(expires_at) = status.expires_at {
        println!("Expires:  {}", expires_at);
    }
    if let Some(closed_at) = status.closed_at {
        println!("Closed:   {}", closed_at);
    }
    if !status.instructions.is_empty() {
        println!("\nInstructions:");
        for line in &status.instructions {
            println!("  {line}");
        }
    }

    println!("\nSide A: {} {} (required) / {} (eligible)",
        status.collection_a.required_amount, status.collection_a.asset, status.collection_a.eligible_amount);
    if let Some(addr) = &status.collection_a.escrow_address {
        println!("  escrow: {addr}");
    }
    println!("Side B: {} {} (required) / {} (eligible)",
        status.collection_b.required_amount, status.collection_b.asset, status.collection_b.eligible_amount);
    if let Some(addr) = &status.collection_b.escrow_address {
        println!("  escrow: {addr}");
    }

    if !status.transactions.is_empty() {
        println!("\nTransactions:");
        for tx in &status.transactions {
            println!(
                "  [{}] {} {} {} -> {} ({})",
                tx.purpose, tx.status, tx.amount, tx.asset, tx.destination_address,
                tx.txid.as_deref().unwrap_or("pending")
            );
        }
    }

    if !status.events.is_empty() {
        println!("\nEvents:");
        for event in &status.events {
            match event.at {
                Some(at) => println!("  [{at}] {}: {}", event.kind, event.detail),
                None => println!("  {}: {}", event.kind, event.detail),
            }
        }
    }
}
