//! Config subcommand handlers.

use secrecy::ExposeSecret;

use purecool_config::{device_to_entry_data, store_credential};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::commands::{config_file, load};
use crate::error::CliError;

const REDACTED: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", config_file(global).display());
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let mut cfg = load(global)?;
            for profile in cfg.devices.values_mut() {
                if profile.credential.is_some() {
                    profile.credential = Some(REDACTED.into());
                }
            }
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }

        // ── Check ───────────────────────────────────────────────────
        ConfigCommand::Check => {
            let cfg = load(global)?;
            if cfg.devices.is_empty() {
                eprintln!(
                    "No devices configured in {}",
                    config_file(global).display()
                );
                return Ok(());
            }

            let mut failed = 0;
            for (name, profile) in &cfg.devices {
                match device_to_entry_data(profile, name) {
                    Ok(data) => {
                        let host = if data.uses_discovery() {
                            "discovery"
                        } else {
                            data.host.as_str()
                        };
                        let credential = if data.credential.expose_secret().is_empty() {
                            "empty"
                        } else {
                            "ok"
                        };
                        println!(
                            "{name}: serial={} type={} host={host} credential={credential}",
                            data.serial, data.device_type
                        );
                    }
                    Err(e) => {
                        failed += 1;
                        println!("{name}: {e}");
                    }
                }
            }

            let interval = cfg.coordinator.update_interval_secs;
            let timeout = cfg.coordinator.refresh_timeout_secs;
            println!("coordinator: every {interval}s, timeout {timeout}s");

            if failed > 0 {
                return Err(CliError::CredentialCheck { failed });
            }
            Ok(())
        }

        // ── SetCredential ───────────────────────────────────────────
        ConfigCommand::SetCredential { serial } => {
            let serial = serial.trim();
            if serial.is_empty() {
                return Err(CliError::Validation {
                    field: "serial".into(),
                    reason: "must not be empty".into(),
                });
            }

            let secret = rpassword::prompt_password("Credential: ")?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "credential".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            store_credential(serial, &secret)?;
            eprintln!("✓ Credential stored in system keyring for {serial}");
            Ok(())
        }
    }
}
