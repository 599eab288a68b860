//! Configuration for the Speakeasy CLI
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::crypto::KdfParams;

/// Speakeasy - gesture knock authentication for a local device
#[derive(Parser, Debug, Clone)]
#[command(name = "speakeasy")]
#[command(about = "Register a secret gesture and knock with it")]
pub struct Args {
    /// Directory holding the encrypted verifier record
    #[arg(long, env = "SPEAKEASY_STORE_DIR", default_value = ".speakeasy")]
    pub store_dir: PathBuf,

    /// Hex device secret file (created on first use).
    /// Defaults to `device.secret` inside the store directory
    #[arg(long, env = "SPEAKEASY_DEVICE_SECRET")]
    pub device_secret: Option<PathBuf>,

    /// JSON doorman policy file
    #[arg(long, env = "SPEAKEASY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Append an audit trail (JSONL) to this file
    #[arg(long, env = "SPEAKEASY_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Argon2id memory cost in KiB
    #[arg(long, env = "SPEAKEASY_KDF_MEMORY_KIB", default_value = "65536")]
    pub kdf_memory_kib: u32,

    /// Argon2id iterations
    #[arg(long, env = "SPEAKEASY_KDF_ITERATIONS", default_value = "3")]
    pub kdf_iterations: u32,

    /// Argon2id parallelism
    #[arg(long, env = "SPEAKEASY_KDF_PARALLELISM", default_value = "4")]
    pub kdf_parallelism: u32,

    #[command(subcommand)]
    pub command: Commands,
}

/// Speakeasy commands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Register a secret gesture, replacing any existing one
    Register {
        /// Gesture capture file (JSON bounds + pointer events)
        #[arg(short, long)]
        gesture: PathBuf,
        /// Origin tokens will be bound to
        #[arg(short, long)]
        domain: String,
        /// Optional duress gesture capture file
        #[arg(short, long)]
        panic: Option<PathBuf>,
    },

    /// Knock with a gesture and print the resulting token
    Knock {
        /// Gesture capture file (JSON bounds + pointer events)
        #[arg(short, long)]
        gesture: PathBuf,
    },

    /// Show whether a verifier is registered
    Status,

    /// Remove the registered verifier
    Clear,
}

impl Args {
    /// Path of the device secret file
    pub fn device_secret_path(&self) -> PathBuf {
        self.device_secret
            .clone()
            .unwrap_or_else(|| self.store_dir.join("device.secret"))
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Err(e) = self.kdf_params().validate() {
            return Err(e.to_string());
        }

        if let Commands::Register { domain, .. } = &self.command {
            if domain.trim().is_empty() {
                return Err("--domain must not be empty".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        let args = Args::try_parse_from([
            "speakeasy",
            "--store-dir",
            "/tmp/door",
            "register",
            "--gesture",
            "secret.json",
            "--domain",
            "https://bar.example",
        ])
        .unwrap();

        assert_eq!(args.device_secret_path(), PathBuf::from("/tmp/door/device.secret"));
        assert!(args.validate().is_ok());
        match args.command {
            Commands::Register { domain, panic, .. } => {
                assert_eq!(domain, "https://bar.example");
                assert!(panic.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_invalid_kdf_rejected() {
        let args = Args::try_parse_from(["speakeasy", "--kdf-iterations", "0", "status"]).unwrap();
        assert!(args.validate().is_err());
    }
}
