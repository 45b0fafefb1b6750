use clap::{Parser, Subcommand};
use tracing::info;

use koi_crypto::keys::Keypair;
use koi_types::rid::NodeRid;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::node::Node;

#[derive(Parser)]
#[command(
    name = "koi-node",
    about = "KOI-net node — peer-to-peer knowledge distribution",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the node
    Run {
        /// Path to config file (created with defaults if missing)
        #[arg(short, long, default_value = "koi.yaml")]
        config: String,
    },
    /// Write a default configuration file
    Init {
        /// Output path for the config file
        #[arg(short, long, default_value = "koi.yaml")]
        config: String,
    },
    /// Generate a keypair and print the node RID material
    Keygen {
        /// Node name for the derived RID
        #[arg(short, long, default_value = "koi-node")]
        name: String,
    },
}

pub async fn run(cli: Cli) -> Result<(), NodeError> {
    match cli.command {
        Command::Run { config } => {
            let config = NodeConfig::load_or_init(&config)?;
            let mut node = Node::new(config, Vec::new())?;
            node.start().await?;

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| NodeError::ServerError {
                    reason: format!("failed to listen for shutdown signal: {}", e),
                })?;
            info!("shutdown signal received");
            node.stop().await;
            Ok(())
        }
        Command::Init { config } => {
            let defaults = NodeConfig::default();
            defaults.save(&config)?;
            println!("wrote default config to {config}");

            let key_path = std::path::Path::new(&defaults.private_key_path);
            if !key_path.exists() {
                let keypair = Keypair::generate();
                koi_crypto::keystore::save_private_key(
                    key_path,
                    &keypair,
                    defaults.key_password().as_deref(),
                )?;
                println!("wrote private key to {}", defaults.private_key_path);
            }
            Ok(())
        }
        Command::Keygen { name } => {
            let keypair = Keypair::generate();
            let public_key = keypair.public_key();
            let rid = NodeRid::from_public_key(&name, &public_key.to_der()?);
            println!("rid:        {rid}");
            println!("public key: {}", public_key.to_der_b64()?);
            println!("private key (PKCS#8 PEM):");
            print!("{}", keypair.to_pkcs8_pem()?.as_str());
            Ok(())
        }
    }
}
