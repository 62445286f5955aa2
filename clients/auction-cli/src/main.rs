//! auction-cli - Auction registration command line interface

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use auction::{
    AuctionClient, DESCRIPTOR_FILE_NAME, ROOT_CERTIFICATE_FILE_NAME, archive,
    authority::generate_root,
};
use clap::{Parser, Subcommand};
use colored::Colorize;

const DEFAULT_AUCTION_URL: &str = "http://localhost:80";
const ROOT_KEY_FILE_NAME: &str = "ca.key";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registration coordinator URL
    #[arg(short, long, env = "AUCTION_URL", default_value = DEFAULT_AUCTION_URL)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a self-signed root CA for the coordinator
    InitCa {
        /// Directory to write ca.cert and ca.key into
        #[arg(long)]
        out: PathBuf,

        /// Common name of the root certificate
        #[arg(long, default_value = "Auction Root CA")]
        common_name: String,

        /// Validity of the root certificate in days
        #[arg(long, default_value_t = 3650)]
        days: u32,
    },

    /// Check that the coordinator is reachable
    Health,

    /// Open a new auction with this host as seller
    Create,

    /// Register this host as a buyer and save its credentials
    Register {
        /// Directory to write {id}.key and {id}.cert into
        #[arg(long)]
        out: PathBuf,
    },

    /// Download the auction descriptor for this host
    Descriptor {
        /// Directory to write hosts.auc into
        #[arg(long)]
        out: PathBuf,
    },

    /// Download the root certificate
    Ca {
        /// Directory to write ca.cert into
        #[arg(long)]
        out: PathBuf,
    },
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(name);
    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn write_private_key(dir: &Path, name: &str, pem: &str) -> Result<PathBuf> {
    let path = write_file(dir, name, pem.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", path.display()))?;
    }

    Ok(path)
}

fn cmd_init_ca(out: &Path, common_name: &str, days: u32) -> Result<()> {
    println!("{}", "Generating root CA...".green());

    let root = generate_root(common_name, days).context("Root CA generation failed")?;
    let cert_path = write_file(out, ROOT_CERTIFICATE_FILE_NAME, root.certificate_pem.as_bytes())?;
    let key_path = write_private_key(out, ROOT_KEY_FILE_NAME, &root.key_pem)?;

    println!("{}", "Root CA created".green().bold());
    println!("  Certificate: {}", cert_path.display().to_string().cyan());
    println!("  Key:         {}", key_path.display().to_string().cyan());

    Ok(())
}

async fn cmd_health(client: &AuctionClient) -> Result<()> {
    client
        .health()
        .await
        .with_context(|| format!("Coordinator at {} is not healthy", client.base_url()))?;
    println!("{}", "Coordinator is healthy".green());
    Ok(())
}

async fn cmd_create(client: &AuctionClient) -> Result<()> {
    println!("{}", "Creating auction...".green());

    let response = client.create().await.context("Auction creation failed")?;

    println!("{}", "Auction created, this host is the seller".green().bold());
    println!("  Status: {}", response.status);

    Ok(())
}

async fn cmd_register(client: &AuctionClient, out: &Path) -> Result<()> {
    println!("{}", "Registering as buyer...".green());

    let bundle = client.register().await.context("Registration failed")?;
    let unpacked = bundle.unpack().context("Credential bundle is malformed")?;

    let key_path = write_private_key(
        out,
        &archive::key_entry_name(bundle.identifier),
        &unpacked.private_key_pem,
    )?;
    let cert_path = write_file(
        out,
        &archive::certificate_entry_name(bundle.identifier),
        unpacked.certificate_pem.as_bytes(),
    )?;

    println!("{}", "Registered".green().bold());
    println!("  Identifier:  {}", bundle.identifier.to_string().cyan());
    println!("  Key:         {}", key_path.display());
    println!("  Certificate: {}", cert_path.display());

    Ok(())
}

async fn cmd_descriptor(client: &AuctionClient, out: &Path) -> Result<()> {
    let descriptor = client
        .descriptor()
        .await
        .context("Descriptor download failed")?;

    let body = serde_json::to_vec_pretty(&descriptor)?;
    let path = write_file(out, DESCRIPTOR_FILE_NAME, &body)?;

    println!("{}", "Descriptor saved".green().bold());
    println!("  Self:   {}", descriptor.self_identifier.to_string().cyan());
    println!("  Seller: {}", descriptor.seller);
    println!("  Hosts:");
    for host in &descriptor.hosts {
        println!("    {}", host);
    }
    println!("  File:   {}", path.display());

    Ok(())
}

async fn cmd_ca(client: &AuctionClient, out: &Path) -> Result<()> {
    let pem = client
        .root_certificate()
        .await
        .context("Root certificate download failed")?;
    let path = write_file(out, ROOT_CERTIFICATE_FILE_NAME, pem.as_bytes())?;

    println!("{}", "Root certificate saved".green().bold());
    println!("  File: {}", path.display());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = AuctionClient::new(&cli.url);

    match &cli.command {
        Commands::InitCa {
            out,
            common_name,
            days,
        } => cmd_init_ca(out, common_name, *days),
        Commands::Health => cmd_health(&client).await,
        Commands::Create => cmd_create(&client).await,
        Commands::Register { out } => cmd_register(&client, out).await,
        Commands::Descriptor { out } => cmd_descriptor(&client, out).await,
        Commands::Ca { out } => cmd_ca(&client, out).await,
    }
}
