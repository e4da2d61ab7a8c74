//! KTS (keyless timestamping) CLI client

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use kts_client::{ClientConfig, KtsClient, TokenStore, Verification};
use kts_core::PublicationsFile;
use kts_types::{HashAlgorithm, Imprint, TimestampToken};

#[derive(Parser)]
#[command(name = "kts")]
#[command(about = "Keyless timestamping client", long_about = None)]
struct Cli {
    /// Calendar base URL, used when no config file is given
    #[arg(short, long, default_value = "http://localhost:8080")]
    server: String,

    /// Client configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Token store directory (overrides the config file)
    #[arg(short = 'd', long)]
    storage_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timestamp a file
    Sign {
        /// File to timestamp
        file: PathBuf,

        /// Also write the token to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Timestamp raw data from stdin
    SignStdin,

    /// Verify a token against a file or an imprint
    Verify {
        /// Imprint (hex) or file path
        input: String,

        /// Token file; defaults to the stored token for the input
        #[arg(short, long)]
        token: Option<PathBuf>,
    },

    /// Extend a stored token to the newest publication
    Extend {
        /// Imprint in hex format
        imprint: String,
    },

    /// Show details of a stored token
    Show {
        /// Imprint in hex format
        imprint: String,
    },

    /// List all stored tokens
    List,

    /// Export a token as JSON
    Export {
        /// Imprint in hex format
        imprint: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a token from JSON
    Import {
        /// Input JSON file
        file: PathBuf,
    },

    /// Download and show the publications file
    Publications,
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ClientConfig::for_base_url(&cli.server)?,
    };
    if let Some(dir) = &cli.storage_dir {
        config.storage_dir = dir.clone();
    }
    Ok(config)
}

fn stored_token(store: &TokenStore, imprint: &Imprint) -> Result<TimestampToken> {
    store
        .get(imprint)?
        .ok_or_else(|| anyhow!("No token found for imprint: {}", imprint))
}

fn print_summary(token: &TimestampToken) {
    println!("Imprint:    {}", token.imprint);
    println!("Registered: {}", token.registration_time);
    println!("Extended:   {}", token.is_extended());
}

fn print_verification(verification: &Verification<TimestampToken>) {
    println!("Result:     {}", verification.code);
    println!("Extension:  {:?}", verification.extension);
    print_summary(&verification.token);
}

/// Resolve a verify input into the document imprint
async fn input_imprint(input: &str, algorithm: HashAlgorithm) -> Result<Imprint> {
    if let Ok(imprint) = Imprint::from_hex(input) {
        return Ok(imprint);
    }
    let path = Path::new(input);
    Ok(kts_client::client::hash_file(path, algorithm).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let client = KtsClient::from_config(&config)?;
    let store = TokenStore::open(&config.storage_dir)?;

    match cli.command {
        Commands::Sign { file, output } => {
            println!("Timestamping file: {}", file.display());

            let token = client.sign_file(&file).await?;
            store.store(&token)?;
            if let Some(path) = output {
                client.save(&path, &token)?;
                println!("Token saved to {}", path.display());
            }

            println!("Timestamp created successfully");
            print_summary(&token);
        }

        Commands::SignStdin => {
            let mut data = Vec::new();
            std::io::stdin().read_to_end(&mut data)?;

            let token = client.sign_data(&data).await?;
            store.store(&token)?;

            println!("Timestamp created successfully");
            print_summary(&token);
        }

        Commands::Verify { input, token } => {
            let token = match token {
                Some(path) => client.load(&path)?,
                None => {
                    let imprint = input_imprint(&input, HashAlgorithm::DEFAULT).await?;
                    stored_token(&store, &imprint)?
                }
            };
            let imprint = input_imprint(&input, token.imprint.algorithm()).await?;

            let verification = client
                .verify_hash(imprint.digest(), imprint.algorithm(), &token)
                .await?;

            if verification.token.is_extended() && !token.is_extended() {
                store.store(&verification.token)?;
            }
            print_verification(&verification);

            if !verification.is_valid() {
                return Err(anyhow!("Verification failed: {}", verification.code));
            }
            if verification.is_degraded() {
                eprintln!("Warning: extension failed, checked against the signing key only");
            }
        }

        Commands::Extend { imprint } => {
            let imprint = Imprint::from_hex(&imprint)?;
            let token = stored_token(&store, &imprint)?;

            let extended = client.extend(&token).await?;
            store.store(&extended)?;

            println!("Token extended successfully");
            print_summary(&extended);
            if let Some(chain) = &extended.calendar_chain {
                println!("Published:  {}", chain.publication_time);
            }
        }

        Commands::Show { imprint } => {
            let imprint = Imprint::from_hex(&imprint)?;
            let token = stored_token(&store, &imprint)?;

            println!("Timestamp Token");
            println!("===============");
            println!("Imprint:       {}", token.imprint);
            println!("Algorithm:     {}", token.imprint.algorithm());
            println!("Nonce:         {}", token.nonce.to_hex());
            println!("Registered:    {}", token.registration_time);
            println!("Round Root:    {}", token.round_root);
            println!("Leaf Index:    {}", token.aggregation_path.leaf_index);
            println!("Path Length:   {}", token.aggregation_path.depth());
            println!("Signing Key:   {}", token.signing_key);
            println!("Signature:     {}", token.signature.to_hex());
            match &token.calendar_chain {
                Some(chain) => {
                    println!("Published:     {}", chain.publication_time);
                    println!("Chain Length:  {}", chain.path.depth());
                }
                None => println!("Published:     (not extended)"),
            }
        }

        Commands::List => {
            let tokens = store.list()?;

            if tokens.is_empty() {
                println!("No stored tokens");
            } else {
                println!("Stored tokens ({})", tokens.len());
                println!();
                for token in tokens {
                    print_summary(&token);
                    println!();
                }
            }
        }

        Commands::Export { imprint, output } => {
            let imprint = Imprint::from_hex(&imprint)?;
            let json = store.export_json(&imprint)?;

            if let Some(output_path) = output {
                std::fs::write(&output_path, json)?;
                println!("Token exported to {}", output_path.display());
            } else {
                println!("{}", json);
            }
        }

        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file)?;
            let imprint = store.import_json(&json)?;

            println!("Token imported successfully");
            println!("Imprint: {}", imprint);
        }

        Commands::Publications => {
            let publications = client.refresh_publications().await?;
            let file = PublicationsFile::decode(&publications.data)?;
            println!("{}", serde_json::to_string_pretty(&file.verification_info())?);
        }
    }

    Ok(())
}
