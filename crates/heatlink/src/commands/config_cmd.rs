//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat, SetProfileArgs};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

fn redact(mut cfg: Config) -> Config {
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(REDACTED.into());
        }
    }
    cfg
}

fn show(cfg: &Config, format: OutputFormat) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(cfg)?,
        OutputFormat::JsonCompact => serde_json::to_string(cfg)?,
        OutputFormat::Table | OutputFormat::Plain => {
            toml::to_string_pretty(cfg).map_err(|e| CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            })?
        }
    })
}

fn set_profile(cfg: &mut Config, args: SetProfileArgs) {
    let profile = Profile {
        host: args.host,
        use_ssl: args.use_ssl,
        username: args.username,
        password_env: args.password_env,
        write_access: args.write_access.then_some(true),
        ..Profile::default()
    };
    let first = cfg.profiles.is_empty();
    cfg.profiles.insert(args.name.clone(), profile);
    if args.default || first {
        cfg.default_profile = Some(args.name);
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redact(config::load_config()?);
            output::print_output(&show(&cfg, global.output)?, global.quiet);
            Ok(())
        }

        ConfigCommand::SetProfile(set) => {
            let name = set.name.clone();
            let mut cfg = config::load_config()?;
            set_profile(&mut cfg, set);
            config::save_config(&cfg)?;
            tracing::info!(profile = %name, path = %config::config_path().display(), "profile saved");
            if !global.quiet {
                eprintln!("Saved profile '{name}' to {}", config::config_path().display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(name: &str, default: bool) -> SetProfileArgs {
        SetProfileArgs {
            name: name.into(),
            host: "192.168.1.50".into(),
            use_ssl: false,
            username: None,
            password_env: Some("HP_PASS".into()),
            write_access: false,
            default,
        }
    }

    #[test]
    fn first_profile_becomes_default() {
        let mut cfg = Config {
            default_profile: None,
            ..Config::default()
        };
        set_profile(&mut cfg, args("cellar", false));
        set_profile(&mut cfg, args("garage", false));
        assert_eq!(cfg.default_profile.as_deref(), Some("cellar"));

        set_profile(&mut cfg, args("garage", true));
        assert_eq!(cfg.default_profile.as_deref(), Some("garage"));
        assert_eq!(cfg.profiles["garage"].write_access, None);
    }

    #[test]
    fn show_redacts_passwords() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                host: "hp.lan".into(),
                password: Some("hunter2".into()),
                ..Profile::default()
            },
        );
        let text = show(&redact(cfg), OutputFormat::Plain).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains(REDACTED));
    }
}
