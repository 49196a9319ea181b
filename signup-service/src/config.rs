// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use signup_common::{
    DEFAULT_ADMIN_ROLE, DEFAULT_DEADLINE_DAYS_AHEAD, DEFAULT_DEADLINE_HOUR,
    DEFAULT_FIRST_CONFIRM_TIMEOUT_SECONDS, DEFAULT_SECOND_CONFIRM_TIMEOUT_SECONDS,
    DEFAULT_UTC_OFFSET_HOURS, TeamConfig, TeamSpec, expand_env_vars,
};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub registration_file: PathBuf,
    pub window_file: PathBuf,
    pub platform_base_url: String,
    pub cycle: CycleConfig,
}

/// Everything that shapes one registration cycle.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub teams: TeamConfig,
    pub admin_role: String,
    pub utc_offset: FixedOffset,
    pub deadline_days_ahead: u64,
    pub deadline_hour: u32,
    pub first_confirm_timeout: Duration,
    pub second_confirm_timeout: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            teams: TeamConfig::default(),
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600)
                .unwrap_or_else(|| Utc.fix()),
            deadline_days_ahead: DEFAULT_DEADLINE_DAYS_AHEAD,
            deadline_hour: DEFAULT_DEADLINE_HOUR,
            first_confirm_timeout: Duration::from_secs(DEFAULT_FIRST_CONFIRM_TIMEOUT_SECONDS),
            second_confirm_timeout: Duration::from_secs(DEFAULT_SECOND_CONFIRM_TIMEOUT_SECONDS),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CycleConfigFile {
    #[serde(default)]
    teams: Option<Vec<TeamSpec>>,
    #[serde(default)]
    admin_role: Option<String>,
    #[serde(default)]
    utc_offset_hours: Option<i32>,
    #[serde(default)]
    deadline_days_ahead: Option<u64>,
    #[serde(default)]
    deadline_hour: Option<u32>,
    #[serde(default)]
    first_confirm_timeout_seconds: Option<u64>,
    #[serde(default)]
    second_confirm_timeout_seconds: Option<u64>,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_addr: parse_bind_addr("SIGNUP_BIND", "0.0.0.0:8080")?,
            registration_file: env_or("SIGNUP_REGISTRATION_FILE", "data/registered_users.json")
                .into(),
            window_file: env_or("SIGNUP_WINDOW_FILE", "data/game_start.json").into(),
            platform_base_url: env_or("SIGNUP_PLATFORM_BASE_URL", "http://chat-gateway:8090"),
            cycle: load_cycle_config()?,
        })
    }
}

fn env_or(var_name: &str, default: &str) -> String {
    std::env::var(var_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    env_or(var_name, default)
        .parse()
        .context(format!("invalid {var_name}"))
}

/// Read the optional YAML file named by `SIGNUP_CONFIG_PATH`.
///
/// An unreadable or unparsable file falls back to defaults; a file that
/// parses but describes an invalid cycle is an error.
pub fn load_cycle_config() -> anyhow::Result<CycleConfig> {
    let Some(path) = std::env::var("SIGNUP_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(CycleConfig::default());
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read signup config file");
            return Ok(CycleConfig::default());
        }
    };

    let Some(parsed) = parse_cycle_config_file(&raw, &path) else {
        return Ok(CycleConfig::default());
    };
    let config =
        cycle_config_from_file(parsed).with_context(|| format!("invalid signup config {path}"))?;
    info!(
        path = %path,
        team_count = config.teams.teams().len(),
        admin_role = %config.admin_role,
        "loaded signup config"
    );
    Ok(config)
}

fn parse_cycle_config_file(raw: &str, path: &str) -> Option<CycleConfigFile> {
    if raw.trim().is_empty() {
        warn!(path = %path, "signup config file is empty");
        return None;
    }

    match serde_yaml::from_str::<CycleConfigFile>(&expand_env_vars(raw)) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse signup config yaml");
            None
        }
    }
}

fn cycle_config_from_file(file: CycleConfigFile) -> anyhow::Result<CycleConfig> {
    let defaults = CycleConfig::default();

    let teams = match file.teams {
        Some(teams) => TeamConfig::new(teams)?,
        None => defaults.teams,
    };

    let admin_role = file
        .admin_role
        .map(|role| role.trim().to_string())
        .filter(|role| !role.is_empty())
        .unwrap_or(defaults.admin_role);

    let utc_offset = match file.utc_offset_hours {
        Some(hours) => FixedOffset::east_opt(hours.saturating_mul(3600))
            .with_context(|| format!("utc_offset_hours {hours} is out of range"))?,
        None => defaults.utc_offset,
    };

    let deadline_hour = file.deadline_hour.unwrap_or(defaults.deadline_hour);
    if deadline_hour > 23 {
        anyhow::bail!("deadline_hour {deadline_hour} must be between 0 and 23");
    }

    Ok(CycleConfig {
        teams,
        admin_role,
        utc_offset,
        deadline_days_ahead: file
            .deadline_days_ahead
            .unwrap_or(defaults.deadline_days_ahead),
        deadline_hour,
        first_confirm_timeout: file
            .first_confirm_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.first_confirm_timeout),
        second_confirm_timeout: file
            .second_confirm_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.second_confirm_timeout),
    })
}
