//! Freight matching and bidding engine.
//!
//! Matches pending loads to fleet capacity, runs the time-bounded
//! offer protocol, prices loads from supply and demand, and evaluates
//! external load postings for profitable bidding.

mod bidding;
mod dispatcher;
mod error;
mod events;
mod feed;
mod matching;
mod metrics;
mod models;
mod pricing;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bidding::{BidEvaluator, BidPolicy, CostModel, RetryConfig};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::feed::{BidGateway, LoadBoardClient, LoadFeed, LogNotifier};
use crate::metrics::MetricsTracker;
use crate::models::{CapacityStatus, CapacityUnit, FeedSource, LoadPosting, UrgencyTier};
use crate::pricing::{demand_ratio, PricingConfig, RateCalculator};
use crate::registry::FleetRegistry;

/// Freight dispatch engine CLI.
#[derive(Parser)]
#[command(name = "freightmatch")]
#[command(about = "Match freight loads to fleet capacity and bid on external postings", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatch engine
    Run {
        /// Roster JSON file of capacity units
        #[arg(short, long)]
        roster: String,

        /// Load board base URL for external postings
        #[arg(long, env = "FREIGHTMATCH_BOARD_URL")]
        board_url: Option<String>,

        /// Feed source the board represents (partner, open_board)
        #[arg(long, default_value = "open_board")]
        board_source: String,

        /// Matching interval in seconds
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Feed polling interval in seconds
        #[arg(short, long, default_value = "30")]
        poll_interval: u64,

        /// Offer time-to-live in seconds
        #[arg(long, default_value = "300")]
        ttl: i64,

        /// Evaluate bids but never auto-submit
        #[arg(long)]
        dry_run: bool,
    },

    /// Price a load from explicit market counts
    Quote {
        /// Shipper's base rate
        #[arg(short, long)]
        base: f64,

        /// Loaded distance in miles
        #[arg(short, long)]
        miles: f64,

        /// Urgency tier (low, medium, high, urgent)
        #[arg(short, long, default_value = "medium")]
        urgency: String,

        /// Available capacity units
        #[arg(long, default_value = "0")]
        available: usize,

        /// Pending loads
        #[arg(long, default_value = "0")]
        pending: usize,
    },

    /// Score a postings JSON file against a roster
    Evaluate {
        /// Postings JSON file
        #[arg(short, long)]
        postings: String,

        /// Roster JSON file of capacity units
        #[arg(short, long)]
        roster: String,
    },

    /// Show effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            roster,
            board_url,
            board_source,
            interval,
            poll_interval,
            ttl,
            dry_run,
        } => {
            let units = load_roster(&roster)?;
            if units.is_empty() {
                println!("Roster {} is empty; nothing to dispatch.", roster);
                return Ok(());
            }

            info!(
                units = units.len(),
                interval = interval,
                dry_run = dry_run,
                "Starting dispatch engine"
            );

            let config = DispatcherConfig {
                match_interval: Duration::from_secs(interval),
                poll_interval: Duration::from_secs(poll_interval),
                offer_ttl_secs: ttl,
                dry_run,
                ..Default::default()
            };
            let mut dispatcher = Dispatcher::new(config, Arc::new(LogNotifier));

            let board = match &board_url {
                Some(url) => {
                    let source: FeedSource = board_source.parse()?;
                    let client = Arc::new(LoadBoardClient::new(url.clone(), source)?);
                    let feed: Arc<dyn LoadFeed> = client.clone();
                    let gateway: Arc<dyn BidGateway> = client;
                    dispatcher.attach_board(feed, gateway);
                    source.as_str()
                }
                None => "none",
            };

            for unit in units {
                let id = unit.id.clone();
                let offline = unit.status == CapacityStatus::Offline;
                dispatcher.register_unit(unit).await?;
                if offline {
                    dispatcher.go_online(&id).await?;
                }
            }

            println!("\n=== Freight Dispatch Engine ===");
            println!("Fleet:            {} units", dispatcher.available_capacity(None).await.len());
            println!("Match interval:   {}s", interval);
            println!("Offer TTL:        {}s", ttl);
            println!("External board:   {}", board_url.as_deref().unwrap_or("none"));
            println!("Board source:     {}", board);
            println!("Mode:             {}", if dry_run { "DRY RUN (no auto-submitted bids)" } else { "LIVE" });
            println!("\nPress Ctrl+C to stop.\n");

            dispatcher.run().await?;

            let snapshot = dispatcher.metrics_snapshot().await;
            println!("\n{}", snapshot);
        }

        Commands::Quote {
            base,
            miles,
            urgency,
            available,
            pending,
        } => {
            let urgency: UrgencyTier = urgency.parse()?;
            let base = Decimal::try_from(base).context("invalid base rate")?;

            let calculator = RateCalculator::default();
            let ratio = demand_ratio(available, pending);
            let rate = calculator.price(base, miles, urgency, ratio);

            println!("\n=== Dynamic Quote ===");
            println!("Base Rate:      ${}", base);
            println!("Distance:       {:.0} mi", miles);
            println!("Urgency:        {}", urgency.as_str());
            println!("Supply/Demand:  {:.2} ({} units / {} loads)", ratio, available, pending);
            println!("Quoted Rate:    ${}", rate);
            if miles > 0.0 {
                let per_mile = rate / Decimal::try_from(miles).context("invalid distance")?;
                println!("Rate per Mile:  ${:.2}", per_mile.round_dp(2));
            }
        }

        Commands::Evaluate { postings, roster } => {
            let units = load_roster(&roster)?;
            let posts: Vec<LoadPosting> = read_json(&postings)?;

            let fleet = FleetRegistry::new();
            for unit in units {
                let id = unit.id.clone();
                let offline = unit.status == CapacityStatus::Offline;
                fleet.register(unit).await?;
                if offline {
                    fleet.set_available(&id).await?;
                }
            }

            let evaluator =
                BidEvaluator::new(fleet, MetricsTracker::new(), CostModel::default());
            let now = Utc::now();

            println!(
                "\n{:<16} {:<10} {:>5} {:>10} {:>5}  {}",
                "POSTING", "SOURCE", "CONF", "BID", "GO", "RISKS"
            );
            println!("{}", "-".repeat(78));

            for posting in posts {
                let eval = evaluator.evaluate(&posting, now).await;
                println!(
                    "{:<16} {:<10} {:>5} {:>10} {:>5}  {}",
                    truncate(&posting.id, 14),
                    posting.source.as_str(),
                    eval.confidence,
                    format!("${}", eval.recommended_bid),
                    if eval.should_bid { "yes" } else { "no" },
                    eval.risk_factors.join("; ")
                );
            }
        }

        Commands::Config => {
            let config = DispatcherConfig::default();
            let pricing = PricingConfig::default();
            let cost = CostModel::default();
            let retry = RetryConfig::default();
            let partner = BidPolicy::partner();
            let open = BidPolicy::open_board();

            println!("\n=== Dispatch Configuration ===\n");
            println!("Intervals:");
            println!("  Match Cycle:          {:?}", config.match_interval);
            println!("  Offer Sweep:          {:?}", config.sweep_interval);
            println!("  Feed Poll:            {:?}", config.poll_interval);
            println!("  Metrics:              {:?}", config.metrics_interval);
            println!("  Offer TTL:            {}s", config.offer_ttl_secs);

            println!("\nPricing:");
            println!("  Min Rate per Mile:    ${}", pricing.min_rate_per_mile);

            println!("\nCost Model:");
            println!("  Fuel per Mile:        ${}", cost.fuel_per_mile);
            println!("  Wear per Mile:        ${}", cost.wear_per_mile);
            println!("  Labor per Hour:       ${}", cost.labor_per_hour);
            println!("  Average Speed:        {:.0} mph", cost.avg_speed_mph);
            println!("  Overhead:             {}%", cost.overhead_pct * Decimal::from(100));

            println!("\nBid Policy (partner / open board):");
            println!(
                "  Max Deadhead:         {:.0} mi / {:.0} mi",
                partner.max_deadhead_miles, open.max_deadhead_miles
            );
            println!(
                "  Target Margin:        {}% / {}%",
                partner.target_margin * Decimal::from(100),
                open.target_margin * Decimal::from(100)
            );
            println!(
                "  Min Confidence:       {} / {}",
                partner.min_confidence, open.min_confidence
            );
            println!(
                "  Auto-Submit At:       {} / {}",
                partner.auto_submit_threshold, open.auto_submit_threshold
            );

            println!("\nBid Submission Retry:");
            println!("  Initial Interval:     {:?}", retry.initial_interval);
            println!("  Max Interval:         {:?}", retry.max_interval);
            println!("  Retry Budget:         {:?}", retry.max_elapsed);
        }
    }

    Ok(())
}

/// Load and parse a roster JSON file.
fn load_roster(path: &str) -> Result<Vec<CapacityUnit>> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path))
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
