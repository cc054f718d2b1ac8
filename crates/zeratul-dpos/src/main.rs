//! Zeratul DPoS - staking engine simulator
//!
//! Replays YAML scenarios against an in-memory store and token ledger, and
//! exposes the power-cap and reward formulas for quick checks.

use anyhow::{Context, Result};
use clap::Parser;
use num_bigint::BigUint;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeratul_dpos::{
    apply_power_cap, calculate_rewards,
    config::{DposConfig, ResolvedStep, Scenario},
    tokens, Dpos, ElectionOutcome, MemoryStore, MemoryToken, Params, TokenLedger,
};

#[derive(Parser)]
#[command(name = "zeratul-dpos")]
#[command(about = "Zeratul DPoS - delegation, validator election and rewards")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Replay a scenario against a fresh in-memory contract
    Simulate {
        /// Contract configuration (params, oracle, genesis balances)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Timed list of transactions and elections
        #[arg(short, long)]
        scenario: PathBuf,
    },

    /// Normalize validator powers with the 28% cap
    PowerCap {
        /// Raw powers
        #[arg(required = true)]
        values: Vec<u64>,
    },

    /// Reward earned per cycle by a delegated amount
    Rewards {
        /// Weighted delegation in whole tokens
        #[arg(short, long)]
        amount: u64,

        /// Election cycle length in seconds
        #[arg(short, long, default_value = "600")]
        cycle: u64,

        /// Total weighted delegation of the validator set in whole tokens
        /// (defaults to `amount`)
        #[arg(short, long)]
        total: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("zeratul_dpos=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate { config, scenario } => simulate(config, scenario),
        Command::PowerCap { values } => {
            let powers: Vec<BigUint> = values.into_iter().map(BigUint::from).collect();
            for (raw, capped) in powers.iter().zip(apply_power_cap(&powers)) {
                println!("{raw:>24} -> {capped}");
            }
            Ok(())
        }
        Command::Rewards { amount, cycle, total } => {
            let params = Params {
                election_cycle_length: cycle,
                ..Params::default()
            };
            let reward = calculate_rewards(&tokens(amount), &params, &tokens(total.unwrap_or(amount)));
            println!("reward per {cycle}s cycle: {reward}");
            Ok(())
        }
    }
}

fn simulate(config: Option<PathBuf>, scenario: PathBuf) -> Result<()> {
    let config = match config {
        Some(path) => DposConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
        None => DposConfig::default(),
    };
    let steps = Scenario::load(&scenario)
        .and_then(|s| s.resolve())
        .with_context(|| format!("loading {}", scenario.display()))?;

    let mut token = MemoryToken::new();
    for (addr, amount) in config.genesis_balances()? {
        token.mint(&addr, &amount);
    }
    let contract = config.contract_address()?;
    let mut dpos = Dpos::init(MemoryStore::new(), token, contract.clone(), config.to_params()?)?;

    info!("running {} steps", steps.len());
    for (i, step) in steps.into_iter().enumerate() {
        match step {
            ResolvedStep::Approve { owner, amount } => {
                dpos.token_mut().approve(&owner, &contract, &amount)?;
            }
            ResolvedStep::Execute { ctx, tx } => {
                let name = tx.name();
                match dpos.execute(&ctx, tx) {
                    Ok(receipt) => info!("step {}: {} by {} -> {:?}", i, name, ctx.sender, receipt),
                    Err(err) => warn!("step {}: {} by {} failed: {}", i, name, ctx.sender, err),
                }
            }
            ResolvedStep::Elect { now } => match dpos.elect(now)? {
                ElectionOutcome::Skipped { next_election } => {
                    info!("step {}: election skipped until {}", i, next_election)
                }
                ElectionOutcome::Completed(report) => info!(
                    "step {}: elected {} validators, {} rewarded",
                    i,
                    report.validators.len(),
                    report.rewards_distributed
                ),
            },
        }
    }

    let queries = dpos.query();
    println!("validators:");
    for validator in queries.list_validators()? {
        println!(
            "  {} power={} delegated={} whitelisted={} rewards={}",
            validator.address,
            validator.power,
            validator.delegation_total,
            validator.whitelist_amount,
            validator.distribution_total
        );
    }
    println!("total rewards distributed: {}", queries.check_rewards()?);
    println!("delegations: {}", queries.delegations_count()?);

    println!("balances:");
    for addr in config.genesis_balances()?.into_iter().map(|(addr, _)| addr) {
        println!("  {} {}", addr, dpos.token().balance_of(&addr));
    }
    println!("  {} {} (contract)", contract, dpos.token().balance_of(&contract));
    Ok(())
}
