//! NOTARY CLI
//!
//! Certify files against network time consensus and verify certificates.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use notary_certify::{CertificationEngine, EngineConfig, HybridKeyManager, TrustAnchor, Verifier};
use notary_core::{CanonicalEncoder, Metadata};
use notary_time::TimeConsensus;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notary")]
#[command(about = "NOTARY - time-consensus evidence certification with hybrid signatures", long_about = None)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a hybrid signing key
    Keygen {
        /// Key file to write
        #[arg(short, long)]
        out: PathBuf,
        /// Also write a trust anchor for verifiers
        #[arg(long)]
        anchor: Option<PathBuf>,
    },
    /// Certify a file
    Certify {
        /// Content to certify
        #[arg(short, long)]
        file: PathBuf,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<PathBuf>,
        /// Signing key file
        #[arg(short, long)]
        key: PathBuf,
        /// Certificate output path
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Verify a certificate
    Verify {
        /// Certified content
        #[arg(short, long)]
        file: PathBuf,
        /// Metadata as a JSON object; defaults to the metadata stored in the certificate
        #[arg(short, long)]
        metadata: Option<PathBuf>,
        /// Certificate to check
        #[arg(long)]
        cert: PathBuf,
        /// Trust anchor written by `keygen --anchor`
        #[arg(long, conflicts_with = "key")]
        anchor: Option<PathBuf>,
        /// Signer key file, for self-verification
        #[arg(short, long)]
        key: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the canonical digest of a file and its metadata
    Digest {
        /// Content to hash
        #[arg(short, long)]
        file: PathBuf,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notary=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen { out, anchor } => {
            let keys = HybridKeyManager::generate();
            keys.save(&out)?;
            if let Some(path) = anchor {
                let json = serde_json::to_string_pretty(&TrustAnchor::for_manager(&keys))?;
                std::fs::write(&path, json).wrap_err_with(|| format!("writing {}", path.display()))?;
                info!(path = %path.display(), "wrote trust anchor");
            }
            println!("{}", keys.key_id());
            Ok(())
        }
        Commands::Certify {
            file,
            metadata,
            key,
            out,
        } => {
            let content = read_content(&file)?;
            let metadata = load_metadata(metadata.as_deref())?;
            let keys = HybridKeyManager::load(&key)?;
            let consensus = TimeConsensus::from_config(config.consensus.clone())?;
            let engine = CertificationEngine::new(consensus, keys).with_verifier_config(config.verifier.clone());

            let cert = engine.certify(&content, &metadata).await?;
            engine.export_certificate(&cert, &out)?;
            println!("{}", cert.content_digest());
            Ok(())
        }
        Commands::Verify {
            file,
            metadata,
            cert,
            anchor,
            key,
            json,
        } => {
            let content = read_content(&file)?;
            let json_cert = std::fs::read_to_string(&cert).wrap_err_with(|| format!("reading {}", cert.display()))?;
            let certificate = notary_certify::Certificate::from_json(&json_cert)?;
            let anchor = match (anchor, key) {
                (Some(path), _) => {
                    let text = std::fs::read_to_string(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<TrustAnchor>(&text)?
                }
                (None, Some(path)) => TrustAnchor::for_manager(&HybridKeyManager::load(&path)?),
                (None, None) => bail!("a trust anchor (--anchor) or signer key (--key) is required"),
            };

            let verifier = Verifier::new(config.verifier.clone());
            let report = match metadata {
                Some(path) => verifier.verify(&content, &load_metadata(Some(&path))?, &certificate, &anchor),
                None => verifier.verify_with_embedded_metadata(&content, &certificate, &anchor),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
            report.into_result()?;
            Ok(())
        }
        Commands::Digest { file, metadata } => {
            let content = read_content(&file)?;
            let metadata = load_metadata(metadata.as_deref())?;
            println!("{}", CanonicalEncoder::encode(&metadata, &content)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    debug!(sources = config.consensus.sources.len(), quorum = ?config.consensus.quorum, "engine config");
    Ok(config)
}

fn read_content(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))
}

fn load_metadata(path: Option<&Path>) -> Result<Metadata> {
    let Some(path) = path else {
        return Ok(Metadata::new());
    };
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    Metadata::from_json_str(&text).wrap_err_with(|| format!("parsing metadata in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_rejects_anchor_and_key_together() {
        let result = Cli::try_parse_from([
            "notary", "verify", "--file", "a", "--cert", "c", "--anchor", "x", "--key", "y",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["notary", "digest", "--file", "a", "--config", "n.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("n.toml")));
    }

    #[test]
    fn test_load_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, r#"{"sender": "alice", "size": 3}"#).unwrap();

        let metadata = load_metadata(Some(&path)).unwrap();
        assert_eq!(metadata.len(), 2);
        assert!(load_metadata(None).unwrap().is_empty());

        std::fs::write(&path, r#"{"sender": null}"#).unwrap();
        assert!(load_metadata(Some(&path)).is_err());
    }
}
