//! Config subcommand handlers.

use std::io::BufRead;

use netvigil_config::{Config, ConfigError, KEYRING_SERVICE, ProfileEntry};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::{config_file, load_config};

const MASK: &str = "****";

// ── Helpers ─────────────────────────────────────────────────────────

fn mask(secret: &mut Option<String>) {
    if secret.is_some() {
        *secret = Some(MASK.into());
    }
}

fn mask_profile(profile: &mut ProfileEntry) {
    mask(&mut profile.password);
    mask(&mut profile.community);
    if let Some(ref mut usm) = profile.usm {
        mask(&mut usm.auth_password);
        mask(&mut usm.priv_password);
    }
}

/// Copy of `cfg` with every plaintext secret replaced.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    cfg.profiles.values_mut().for_each(mask_profile);
    for device in &mut cfg.devices {
        if let Some(ref mut creds) = device.credentials {
            mask_profile(creds);
        }
    }
    cfg
}

fn read_secret() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_owned();
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: "secret".into(),
            reason: "empty value on stdin".into(),
        });
    }
    Ok(secret)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config_file(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redacted(&load_config(global)?);
            let rendered = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::Check => {
            let cfg = load_config(global)?;
            let inventory = cfg.inventory()?;
            output::print_output(
                &format!(
                    "{}: {} profiles, {} devices, {} connections",
                    config_file(global).display(),
                    inventory.profiles.len(),
                    inventory.devices.len(),
                    inventory.connections.len(),
                ),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = config_file(global);
            if path.exists() && !force {
                return Err(CliError::AlreadyExists {
                    path: path.display().to_string(),
                });
            }
            netvigil_config::save_config(&Config::default(), &path)?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        }

        ConfigCommand::SetSecret { owner, kind } => {
            let secret = read_secret()?;
            let account = format!("{owner}/{}", kind.key_suffix());
            keyring::Entry::new(KEYRING_SERVICE, &account)
                .and_then(|entry| entry.set_password(&secret))
                .map_err(|e| CliError::Keyring {
                    message: e.to_string(),
                })?;
            eprintln!("Stored {account} in the system keyring");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use netvigil_config::UsmEntry;

    use super::*;

    #[test]
    fn redaction_masks_every_plaintext_secret() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "ops".into(),
            ProfileEntry {
                username: Some("monitor".into()),
                password: Some("hunter2".into()),
                community: Some("private".into()),
                usm: Some(UsmEntry {
                    username: "ops".into(),
                    auth_password: Some("authpass".into()),
                    ..UsmEntry::default()
                }),
                ..ProfileEntry::default()
            },
        );

        let shown = redacted(&cfg);
        let ops = &shown.profiles["ops"];
        assert_eq!(ops.username.as_deref(), Some("monitor"));
        assert_eq!(ops.password.as_deref(), Some(MASK));
        assert_eq!(ops.community.as_deref(), Some(MASK));
        let usm = ops.usm.as_ref().map(|u| u.auth_password.as_deref());
        assert_eq!(usm, Some(Some(MASK)));
        assert_eq!(ops.usm.as_ref().map(|u| u.priv_password.is_none()), Some(true));
    }
}
