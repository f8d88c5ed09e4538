use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use flip_client::{
    AccountBalance,
    ClientConfig,
    EndpointState,
    HttpTransport,
    NetworkProfile,
    Resolution,
    Session,
    WagerOutcome,
    RpcTransport,
    accounts::to_ui_amount,
    wallets::{
        DEFAULT_WALLET_NAME,
        find_wallet,
        resolve_wallet_dir,
        unlock_wallet,
    },
};
use rust_decimal::Decimal;
use solana_sdk::{
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
};
use std::path::PathBuf;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const LOG_DIR: &str = ".logs";
const LOG_FILE: &str = "flip.log";

#[derive(Parser, Debug)]
#[command(
    name = "flip",
    about = "Check balances and flip tokens against the on-chain flip game",
    version,
    group(
        ArgGroup::new("network")
            .args(["mainnet", "devnet", "local"])
            .required(true)
    )
)]
struct Args {
    /// Use Solana mainnet-beta
    #[arg(long)]
    mainnet: bool,

    /// Use Solana devnet
    #[arg(long)]
    devnet: bool,

    /// Use a local validator
    #[arg(long)]
    local: bool,

    /// RPC URL tried before the built-in endpoints (also read from FLIP_RPC_URL)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Wallet name: a keypair `<name>.json` or keystore `<name>.wallet`
    #[arg(long, default_value = DEFAULT_WALLET_NAME)]
    wallet: String,

    /// Override wallet directory (defaults to ~/.config/solana)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Override the flip program id
    #[arg(long)]
    program_id: Option<String>,

    /// Override the token mint
    #[arg(long)]
    mint: Option<String>,

    /// Override the vault wallet
    #[arg(long)]
    vault_wallet: Option<String>,

    /// Override the token's decimal precision
    #[arg(long)]
    decimals: Option<u8>,

    /// Load the full client configuration from a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log to stderr instead of .logs/
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a token balance (the wallet's unless --address is given)
    Balance {
        #[arg(long)]
        address: Option<String>,
    },
    /// Show the vault balance backing payouts
    Pot,
    /// Show the game's on-chain counters
    State,
    /// Probe every configured RPC endpoint
    Endpoints,
    /// Wager tokens on a coin flip
    Flip {
        /// Wager in whole tokens, e.g. 2.5
        #[arg(long)]
        amount: Decimal,

        /// Number of consecutive flips
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },
    /// Save the active program, mint and vault as this network's deployment
    Record {
        #[arg(long)]
        token_ticker: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _guard = init_tracing(args.verbose)?;
    deployments::ensure_structure()
        .map_err(|e| eyre!(e))
        .wrap_err("initializing deployment directories")?;

    let (env, profile) = if args.mainnet {
        (DeploymentEnv::Mainnet, NetworkProfile::Mainnet)
    } else if args.devnet {
        (DeploymentEnv::Dev, NetworkProfile::Devnet)
    } else {
        (DeploymentEnv::Local, NetworkProfile::Local)
    };
    let config = resolve_config(&args, env, profile)?;
    tracing::info!(network = %profile, endpoints = ?config.endpoints, "starting flip client");

    let transport =
        HttpTransport::new(config.request_timeout()).wrap_err("building RPC transport")?;
    let mut session = Session::new(config, transport).wrap_err("opening session")?;

    match &args.command {
        Command::Balance { address } => {
            let owner = match address {
                Some(raw) => parse_pubkey(raw, "--address")?,
                None => load_wallet(&args)?.pubkey(),
            };
            let balance = session.refresh_balance(&owner).await?;
            print_balance("Balance", &balance);
        }
        Command::Pot => {
            let pot = session.refresh_pot().await?;
            print_balance("Pot", &pot);
        }
        Command::State => {
            let decimals = session.config().decimals;
            match session.game_state().await? {
                Some(state) => {
                    println!("Game state   {}", session.program().game_state);
                    println!("Authority    {}", state.authority);
                    println!("Token mint   {}", state.token_mint);
                    println!("Vault wallet {}", state.vault_wallet);
                    println!("Flips        {}", state.flip_count);
                    println!("Volume       {}", to_ui_amount(state.total_volume, decimals));
                    println!(
                        "House cut    {}",
                        to_ui_amount(state.total_house_earnings, decimals)
                    );
                }
                None => println!(
                    "Game state account {} does not exist; the program is not initialized",
                    session.program().game_state
                ),
            }
        }
        Command::Endpoints => {
            for endpoint in session.probe_endpoints().await {
                let state = match endpoint.state() {
                    EndpointState::Live => "live",
                    EndpointState::Failed => "failed",
                    EndpointState::Untested => "untested",
                };
                println!("{state:>8}  {}", endpoint.url());
            }
        }
        Command::Flip { amount, rounds } => {
            let keypair = load_wallet(&args)?;
            for round in 1..=*rounds {
                let outcome = session
                    .perform_wager(&keypair, *amount)
                    .await
                    .wrap_err_with(|| format!("flip {round} of {rounds} failed"))?;
                print_outcome(&outcome, token_decimals(&session));
            }
            if let Some(balance) = session.displayed_balance() {
                print_balance("Balance", balance);
            }
            if let Some(pot) = session.displayed_pot() {
                print_balance("Pot", pot);
            }
            println!("Recent flips:");
            let decimals = token_decimals(&session);
            for entry in session.history().iter() {
                let verb = if entry.outcome.won { "won" } else { "got FLIPPED for" };
                let payout = if entry.outcome.won {
                    format!(" (+{})", to_ui_amount(entry.outcome.payout, decimals))
                } else {
                    String::new()
                };
                println!(
                    "  {}  {}  {verb} {}{payout}",
                    entry.recorded_at.format("%H:%M:%S"),
                    entry.actor,
                    to_ui_amount(entry.wager, decimals),
                );
            }
        }
        Command::Record { token_ticker } => {
            let config = session.config();
            let mut record = DeploymentRecord::new(
                config.program_id.to_string(),
                config.mint.to_string(),
                config.vault_wallet.to_string(),
            );
            record.decimals = Some(config.decimals);
            record.network_url = config.endpoints.first().cloned();
            record.token_ticker = token_ticker.clone();
            let store = DeploymentStore::new(env)
                .map_err(|e| eyre!(e))
                .wrap_err("opening deployment store")?;
            store
                .save(&record)
                .map_err(|e| eyre!(e))
                .wrap_err("saving deployment record")?;
            println!("Recorded {env} deployment in {}", store.path().display());
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if verbose {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| eyre!(e))?;
        return Ok(None);
    }
    let appender = rolling::daily(LOG_DIR, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!(e))?;
    Ok(Some(guard))
}

/// Precedence: config file, else built-in network defaults overlaid with the
/// stored deployment record. Explicit flags win over both.
fn resolve_config(
    args: &Args,
    env: DeploymentEnv,
    profile: NetworkProfile,
) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_json_file(path)
            .wrap_err_with(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = ClientConfig::for_network(profile)?;
            let store = DeploymentStore::new(env)
                .map_err(|e| eyre!(e))
                .wrap_err("opening deployment store")?;
            let stored = store
                .load()
                .map_err(|e| eyre!(e))
                .wrap_err("reading deployment record")?;
            if let Some(record) = stored {
                tracing::info!(%env, program_id = %record.program_id, "using stored deployment");
                config.program_id = parse_pubkey(&record.program_id, "stored program id")?;
                config.mint = parse_pubkey(&record.token_mint, "stored token mint")?;
                config.vault_wallet =
                    parse_pubkey(&record.vault_wallet, "stored vault wallet")?;
                if let Some(decimals) = record.decimals {
                    config.decimals = decimals;
                }
            }
            config
        }
    };

    if let Some(raw) = &args.program_id {
        config.program_id = parse_pubkey(raw, "--program-id")?;
    }
    if let Some(raw) = &args.mint {
        config.mint = parse_pubkey(raw, "--mint")?;
    }
    if let Some(raw) = &args.vault_wallet {
        config.vault_wallet = parse_pubkey(raw, "--vault-wallet")?;
    }
    if let Some(decimals) = args.decimals {
        config.decimals = decimals;
    }
    let endpoint_override = args
        .rpc_url
        .clone()
        .or_else(ClientConfig::endpoint_override_from_env);
    let config = config.with_endpoint_override(endpoint_override);
    config.validate()?;
    Ok(config)
}

fn parse_pubkey(raw: &str, what: &str) -> Result<Pubkey> {
    flip_client::config::parse_pubkey(raw)
        .wrap_err_with(|| format!("{what} is not a valid address"))
}

/// Precision the chain reported with the last balance read, else the
/// configured one.
fn token_decimals<T: RpcTransport>(session: &Session<T>) -> u8 {
    session
        .displayed_balance()
        .filter(|balance| balance.token_account.is_some())
        .map(|balance| balance.decimals)
        .unwrap_or(session.config().decimals)
}

fn load_wallet(args: &Args) -> Result<Keypair> {
    let dir = resolve_wallet_dir(args.wallet_dir.as_deref())
        .wrap_err("resolving wallet directory")?;
    let descriptor = find_wallet(&dir, &args.wallet).wrap_err("locating requested wallet")?;
    unlock_wallet(&descriptor).wrap_err("unlocking wallet")
}

fn print_balance(label: &str, balance: &AccountBalance) {
    match balance.token_account {
        Some(account) => println!(
            "{label}: {} (owner {}, account {account})",
            balance.ui_amount(),
            balance.owner
        ),
        None => println!(
            "{label}: 0 (owner {} holds no account for mint {})",
            balance.owner, balance.mint
        ),
    }
}

fn print_outcome(outcome: &WagerOutcome, decimals: u8) {
    let how = match outcome.resolution {
        Resolution::Confirmed => "confirmed by program event".to_string(),
        Resolution::Inferred(method) => format!("inferred from {method:?}"),
    };
    if outcome.won {
        println!(
            "YOU WON! Payout {} ({how}, tx {})",
            to_ui_amount(outcome.payout, decimals),
            outcome.tx_id
        );
    } else {
        println!(
            "YOU GOT FLIPPED! Lost {} ({how}, tx {})",
            to_ui_amount(outcome.wager, decimals),
            outcome.tx_id
        );
    }
}
