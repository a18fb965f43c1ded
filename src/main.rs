extern crate docsign;

use std::process;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use docsign::commons::api::{DocumentId, SignatureId};
use docsign::commons::error::Error;
use docsign::commons::DocsignResult;
use docsign::config::Config;
use docsign::constants::{DOCSIGN_DEFAULT_CONFIG_FILE, DOCSIGN_ENV_CONFIG};
use docsign::service::{hardware_gateway, SignatureService};
use docsign::signing::progress::LogProgressChannel;
use docsign::signing::render::RendererRegistry;


//------------ Options -------------------------------------------------------

/// Administration of hardware token document signing.
#[derive(clap::Parser)]
#[command(version)]
struct Options {
    /// The config file.
    #[arg(
        short, long,
        env = DOCSIGN_ENV_CONFIG,
        default_value = DOCSIGN_DEFAULT_CONFIG_FILE,
        value_name = "FILE"
    )]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// List the tokens visible through the configured CA providers
    Tokens,

    /// List the signatures of a document
    Signatures {
        /// The document id
        document_id: DocumentId,

        /// Include revoked signatures
        #[arg(long)]
        history: bool,
    },

    /// Verify a stored signature
    Verify {
        /// The signature id
        signature_id: SignatureId,
    },

    /// Check the configuration and show the effective values
    Config,
}


//------------ main ----------------------------------------------------------

#[tokio::main]
async fn main() {
    let options = Options::parse();

    let config = match Config::create(&options.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(options.command, config).await {
        eprintln!("{}", e);
        process::exit(1);
    }
}

async fn run(command: Command, config: Arc<Config>) -> DocsignResult<()> {
    if let Command::Config = command {
        let effective = toml::to_string_pretty(config.as_ref()).map_err(Error::custom)?;
        print!("{}", effective);
        return Ok(());
    }

    let service = SignatureService::build(
        config.clone(),
        hardware_gateway(&config)?,
        RendererRegistry::new(),
        Arc::new(LogProgressChannel),
    )?;

    match command {
        Command::Tokens => print_json(&service.list_tokens().await?),
        Command::Signatures { document_id, history } => {
            let records = if history {
                service.signature_history(&document_id)?
            } else {
                service.list_signatures(&document_id)?
            };
            print_json(&records)
        }
        Command::Verify { signature_id } => {
            let verification = service.verify_signature(signature_id)?;
            print_json(&verification)?;
            if !verification.valid {
                process::exit(2);
            }
            Ok(())
        }
        Command::Config => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> DocsignResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(Error::custom)?;
    println!("{}", json);
    Ok(())
}
