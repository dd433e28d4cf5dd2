//! barterbox: drive P2P NFT escrow trades from a terminal
//!
//! every subcommand acts as `--from`, talking to the escrow node at
//! `--node`. mutating commands wait for confirmation and for the read
//! path to catch up before printing the resulting record.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use escrow_client::{
    format_price, Address, ClientConfig, CreateParams, Escrow, EscrowClientError,
    EscrowCoordinator, EscrowGateway, EscrowId, EscrowNodeClient, TxOutcome,
};

#[derive(Parser)]
#[command(name = "barterbox")]
#[command(about = "P2P NFT escrow trades on the barterbox test network")]
struct Cli {
    /// escrow node JSON-RPC endpoint
    #[arg(long, env = "BARTERBOX_NODE", default_value = "http://localhost:8545")]
    node: String,

    /// account to act as
    #[arg(long, env = "BARTERBOX_FROM")]
    from: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// show one escrow
    Status { id: u64 },

    /// list your escrows, or a conversation's
    List {
        /// messaging conversation id to list instead of your own trades
        #[arg(long)]
        conversation: Option<String>,
    },

    /// create a new escrow
    Create {
        #[arg(long)]
        seller: String,

        #[arg(long)]
        buyer: String,

        /// NFT contract address
        #[arg(long)]
        nft: String,

        #[arg(long)]
        token_id: u64,

        /// decimal price, e.g. 1.5
        #[arg(long)]
        price: String,

        /// escrow lifetime in hours
        #[arg(long, default_value_t = 24)]
        duration: u64,

        /// messaging conversation this trade belongs to
        #[arg(long)]
        conversation: String,

        /// optional off-chain metadata pointer
        #[arg(long)]
        metadata: Option<String>,
    },

    /// deposit the payment (buyer)
    Fund { id: u64 },

    /// approve and deposit the NFT (seller)
    DepositNft { id: u64 },

    /// settle an active trade
    Complete { id: u64 },

    /// cancel a non-disputed escrow
    Cancel {
        id: u64,

        #[arg(long, default_value = "cancelled by user")]
        reason: String,
    },

    /// raise a dispute (pays the contract's dispute fee)
    Dispute {
        id: u64,

        #[arg(long)]
        reason: String,
    },

    /// recover deposits after the deadline (or an expired dispute)
    CancelExpired { id: u64 },

    /// follow an escrow until it settles
    Watch { id: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let caller = Address::parse(&cli.from).context("bad --from address")?;
    let config = ClientConfig {
        node_endpoint: cli.node.clone(),
        ..ClientConfig::default()
    };
    let gateway = Arc::new(EscrowNodeClient::new(&config, caller)?);
    let coordinator = EscrowCoordinator::new(gateway, caller, config);

    match cli.command {
        Commands::Status { id } => {
            let id = EscrowId(id);
            match coordinator.refresh(id).await? {
                Some(escrow) => print_escrow(&coordinator, &escrow),
                None => println!("escrow {id} not found"),
            }
        }

        Commands::List { conversation } => {
            let ids = match &conversation {
                Some(conversation) => coordinator.conversation_escrows(conversation).await?,
                None => coordinator.my_escrows().await?,
            };
            if ids.is_empty() {
                let total = coordinator.gateway().get_total_escrows().await?;
                println!("no escrows ({total} exist network-wide)");
                return Ok(());
            }
            for (index, id) in ids.iter().enumerate() {
                match coordinator.refresh(*id).await? {
                    Some(escrow) => {
                        let decimals = coordinator.config().currency_decimals;
                        println!(
                            "{:>3}. {} [{}] {} for token {} of {}",
                            index + 1,
                            escrow.id,
                            escrow.state,
                            format_price(escrow.price, decimals),
                            escrow.token_id,
                            escrow.nft_contract,
                        );
                    }
                    None => println!("{:>3}. {} (unreadable)", index + 1, id),
                }
            }
        }

        Commands::Create {
            seller,
            buyer,
            nft,
            token_id,
            price,
            duration,
            conversation,
            metadata,
        } => {
            let params = CreateParams {
                seller: Address::parse(&seller).context("bad --seller address")?,
                buyer: Address::parse(&buyer).context("bad --buyer address")?,
                nft_contract: Address::parse(&nft).context("bad --nft address")?,
                token_id,
                price,
                duration_hours: duration,
                conversation_id: conversation,
                metadata_ref: metadata,
            };
            report(&coordinator, coordinator.create(params).await)?;
        }

        Commands::Fund { id } => {
            report(&coordinator, coordinator.fund(EscrowId(id)).await)?;
        }

        Commands::DepositNft { id } => {
            report(&coordinator, coordinator.deposit_nft(EscrowId(id)).await)?;
        }

        Commands::Complete { id } => {
            report(&coordinator, coordinator.complete(EscrowId(id)).await)?;
        }

        Commands::Cancel { id, reason } => {
            report(&coordinator, coordinator.cancel(EscrowId(id), &reason).await)?;
        }

        Commands::Dispute { id, reason } => {
            report(&coordinator, coordinator.dispute(EscrowId(id), &reason).await)?;
        }

        Commands::CancelExpired { id } => {
            report(&coordinator, coordinator.cancel_expired(EscrowId(id)).await)?;
        }

        Commands::Watch { id } => {
            let settled = coordinator
                .watch(EscrowId(id), |escrow| {
                    println!("escrow {} is now {}", escrow.id, escrow.state);
                })
                .await?;
            print_escrow(&coordinator, &settled);
        }
    }

    Ok(())
}

/// render a mutating-flow outcome; a declined signature is a notice,
/// not an error
fn report(
    coordinator: &EscrowCoordinator,
    result: escrow_client::Result<TxOutcome>,
) -> Result<()> {
    match result {
        Ok(TxOutcome::Confirmed(escrow)) => {
            println!("confirmed");
            print_escrow(coordinator, &escrow);
        }
        Ok(TxOutcome::Submitted { tx, warning }) => {
            println!("submitted {tx}");
            println!("note: {warning}");
        }
        Err(EscrowClientError::UserRejected) => {
            println!("cancelled: the signing request was declined");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_escrow(coordinator: &EscrowCoordinator, escrow: &Escrow) {
    let decimals = coordinator.config().currency_decimals;
    println!("escrow {}", escrow.id);
    println!("  state:    {}", escrow.state);
    println!("  seller:   {}", escrow.seller);
    println!("  buyer:    {}", escrow.buyer);
    println!("  asset:    token {} of {}", escrow.token_id, escrow.nft_contract);
    println!("  price:    {}", format_price(escrow.price, decimals));
    println!("  deadline: {} (unix)", escrow.deadline);
    if escrow.state == escrow_client::EscrowState::Disputed {
        println!("  dispute deadline: {} (unix)", escrow.dispute_deadline);
    }
    if escrow.seller_agreed || escrow.buyer_agreed {
        println!(
            "  agreed:   seller={} buyer={}",
            escrow.seller_agreed, escrow.buyer_agreed
        );
    }
    if let Some(metadata) = &escrow.metadata_ref {
        println!("  metadata: {metadata}");
    }
    println!("  next:     {}", coordinator.guidance(escrow));
}
