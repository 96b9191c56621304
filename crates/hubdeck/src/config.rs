//! Profile resolution with CLI flag overrides.
//!
//! File, env and keyring handling lives in `hubdeck-config`; this module
//! layers `--url`, `--token` and friends on top.

use std::time::Duration;

use secrecy::SecretString;

use hubdeck_config::{Config, Defaults, Profile};
use hubdeck_core::{HubConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use hubdeck_config::{config_path, load_config_or_default, save_config};

/// `--profile`, then the config's default, then `"default"`.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Comma-separated profile names, for help text.
pub fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<_> = cfg.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

/// Build a `HubConfig` from the config file, profile, and CLI overrides.
pub fn build_hub_config(global: &GlobalOpts) -> Result<HubConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut hub = match cfg.profiles.get(&profile_name) {
        Some(profile) => resolve_profile(profile, &profile_name, &cfg.defaults, global)?,
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(&cfg),
            });
        }
        None => from_flags(global, &profile_name, &cfg.defaults)?,
    };

    if global.insecure {
        hub.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        hub.timeout = Duration::from_secs(secs);
    }
    if global.no_websocket {
        hub.websocket_enabled = false;
    }
    Ok(hub)
}

fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    global: &GlobalOpts,
) -> Result<HubConfig, CliError> {
    let mut hub = match &global.token {
        Some(token) => hubdeck_config::profile_to_hub_config_with_token(
            profile,
            defaults,
            SecretString::from(token.clone()),
        )?,
        None => hubdeck_config::profile_to_hub_config(profile, profile_name, defaults)?,
    };
    if let Some(url) = &global.url {
        hub.url = hubdeck_config::parse_hub_url(url)?;
    }
    Ok(hub)
}

/// No profile on disk: `--url` and `--token` must carry everything.
fn from_flags(
    global: &GlobalOpts,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<HubConfig, CliError> {
    let url = global.url.as_deref().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;
    let token = global.token.clone().ok_or_else(|| CliError::NoCredentials {
        profile: profile_name.to_owned(),
    })?;

    let mut hub = HubConfig::new(
        hubdeck_config::parse_hub_url(url)?,
        SecretString::from(token),
    );
    hub.timeout = Duration::from_secs(defaults.timeout);
    hub.poll_interval = Duration::from_secs(defaults.poll_interval.max(1));
    if defaults.insecure {
        hub.tls = TlsVerification::DangerAcceptInvalid;
    }
    Ok(hub)
}
