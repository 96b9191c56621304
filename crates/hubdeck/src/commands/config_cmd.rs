//! Config subcommand handlers.

use std::fmt::Write as _;
use std::io::BufRead;

use hubdeck_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, SetProfileArgs, SetTokenArgs, UseArgs};
use crate::config::{self, active_profile_name, available_profiles};
use crate::error::CliError;
use crate::output;

/// Format config for display, masking tokens.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    let _ = writeln!(out, "poll_interval = {}", cfg.defaults.poll_interval);

    let mut profiles: Vec<_> = cfg.profiles.iter().collect();
    profiles.sort_by(|a, b| a.0.cmp(b.0));
    for (name, p) in profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "url = \"{}\"", p.url);
        if p.token.is_some() {
            let _ = writeln!(out, "token = \"****\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(websocket) = p.websocket {
            let _ = writeln!(out, "websocket = {websocket}");
        }
        if let Some(poll) = p.poll_interval {
            let _ = writeln!(out, "poll_interval = {poll}");
        }
    }

    out
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = hubdeck_config::load_config()?;
            output::print_output(format_config_redacted(&cfg).trim_end(), global.quiet);
            Ok(())
        }
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let active = active_profile_name(global, &cfg);
            let mut names: Vec<_> = cfg.profiles.keys().collect();
            names.sort();
            let out = names
                .into_iter()
                .map(|n| {
                    if *n == active {
                        format!("* {n}")
                    } else {
                        format!("  {n}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            output::print_output(&out, global.quiet);
            Ok(())
        }
        ConfigCommand::SetProfile(args) => set_profile(&args, global),
        ConfigCommand::SetToken(args) => set_token(&args, global),
        ConfigCommand::Use(args) => use_profile(&args, global),
    }
}

fn set_profile(args: &SetProfileArgs, global: &GlobalOpts) -> Result<(), CliError> {
    hubdeck_config::parse_hub_url(&args.hub_url)?;
    if args.poll_interval == Some(0) {
        return Err(CliError::Validation {
            field: "poll_interval".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    let mut cfg = config::load_config_or_default();
    let first = cfg.profiles.is_empty();
    let profile = cfg.profiles.entry(args.name.clone()).or_default();
    profile.url.clone_from(&args.hub_url);
    if args.token_env.is_some() {
        profile.token_env.clone_from(&args.token_env);
    }
    profile.websocket = args.rest_only.then_some(false);
    if args.poll_interval.is_some() {
        profile.poll_interval = args.poll_interval;
    }
    if first {
        cfg.default_profile = Some(args.name.clone());
    }
    config::save_config(&cfg)?;

    output::print_output(&format!("Saved profile '{}'", args.name), global.quiet);
    Ok(())
}

fn set_token(args: &SetTokenArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config_or_default();
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| active_profile_name(global, &cfg));

    let token = match &args.value {
        Some(value) => value.clone(),
        None => {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line.trim().to_owned()
        }
    };
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "token cannot be empty".into(),
        });
    }

    hubdeck_config::store_token(&name, &token)?;
    output::print_output(
        &format!("Token for profile '{name}' stored in the system keyring"),
        global.quiet,
    );
    Ok(())
}

fn use_profile(args: &UseArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load_config_or_default();
    if !cfg.profiles.contains_key(&args.name) {
        return Err(CliError::ProfileNotFound {
            name: args.name.clone(),
            available: available_profiles(&cfg),
        });
    }
    cfg.default_profile = Some(args.name.clone());
    config::save_config(&cfg)?;
    output::print_output(&format!("Default profile is now '{}'", args.name), global.quiet);
    Ok(())
}
