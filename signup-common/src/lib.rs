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

use std::{
    collections::{BTreeMap, HashSet},
    sync::LazyLock,
};

use chrono::{DateTime, Days, FixedOffset, SubsecRound, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;
pub const DEFAULT_DEADLINE_DAYS_AHEAD: u64 = 2;
pub const DEFAULT_DEADLINE_HOUR: u32 = 21;
pub const DEFAULT_ADMIN_ROLE: &str = "Admin";
pub const DEFAULT_FIRST_CONFIRM_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_SECOND_CONFIRM_TIMEOUT_SECONDS: u64 = 30;

/// Default roster: six Chinese-affinity teams followed by two English ones.
pub const DEFAULT_TEAMS: [(&str, Language); 8] = [
    ("A", Language::Zh),
    ("B", Language::Zh),
    ("C", Language::Zh),
    ("D", Language::Zh),
    ("E", Language::Zh),
    ("F", Language::Zh),
    ("G", Language::En),
    ("H", Language::En),
];

/// Platform-assigned user identifier.
pub type UserId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Zh,
    En,
    Both,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Zh, Language::En, Language::Both];

    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
            Language::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zh" => Some(Language::Zh),
            "en" => Some(Language::En),
            "both" => Some(Language::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamSpec {
    pub name: String,
    pub affinity: Language,
}

/// Ordered, validated team roster. Declaration order drives allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamConfig {
    teams: Vec<TeamSpec>,
}

impl TeamConfig {
    /// Team names must be non-empty and unique, affinities must be `zh` or
    /// `en`, and each of the two affinities needs at least one team.
    pub fn new(teams: Vec<TeamSpec>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for team in &teams {
            let name = team.name.trim();
            if name.is_empty() {
                anyhow::bail!("team names must not be empty");
            }
            if name != team.name {
                anyhow::bail!("team name {:?} has surrounding whitespace", team.name);
            }
            if !seen.insert(name) {
                anyhow::bail!("duplicate team name {name}");
            }
            if team.affinity == Language::Both {
                anyhow::bail!("team {name} must have zh or en affinity");
            }
        }

        for affinity in [Language::Zh, Language::En] {
            if !teams.iter().any(|team| team.affinity == affinity) {
                anyhow::bail!("at least one team with {} affinity is required", affinity.code());
            }
        }

        Ok(Self { teams })
    }

    pub fn teams(&self) -> &[TeamSpec] {
        &self.teams
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.teams.iter().map(|team| team.name.as_str())
    }

    /// Positions (in declaration order) of the teams with the given affinity.
    pub fn indices_with_affinity(&self, affinity: Language) -> Vec<usize> {
        self.teams
            .iter()
            .enumerate()
            .filter(|(_, team)| team.affinity == affinity)
            .map(|(index, _)| index)
            .collect()
    }
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            teams: DEFAULT_TEAMS
                .iter()
                .map(|(name, affinity)| TeamSpec {
                    name: (*name).to_string(),
                    affinity: *affinity,
                })
                .collect(),
        }
    }
}

/// On-disk shape of the registration record.
#[derive(Debug, Clone, Default, Deserialize)]
struct RegistrationRecord {
    #[serde(default)]
    registered_users: Vec<UserId>,
    #[serde(default)]
    lang: BTreeMap<UserId, Language>,
}

/// Registered users in registration order plus their language choices.
///
/// A user may be registered without a language, or registered with exactly
/// one. Loading a record drops duplicate ids and languages recorded for users
/// that are not registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RegistrationRecord")]
pub struct Registrations {
    registered_users: Vec<UserId>,
    lang: BTreeMap<UserId, Language>,
}

impl From<RegistrationRecord> for Registrations {
    fn from(record: RegistrationRecord) -> Self {
        let mut registrations = Registrations::default();
        for user_id in record.registered_users {
            registrations.register(user_id);
        }
        let lang = record
            .lang
            .into_iter()
            .filter(|(user_id, _)| registrations.is_registered(*user_id))
            .collect();
        registrations.lang = lang;
        registrations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageOutcome {
    Recorded,
    AlreadyChosen(Language),
    NotRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    WindowClosed,
    AlreadyRegistered(Language),
    /// The user is registered and still has to pick a language.
    /// `newly_added` is false when the user was already registered.
    AwaitingLanguage { newly_added: bool },
}

impl RegisterOutcome {
    /// True when the registration record changed and must be saved.
    pub fn is_mutation(self) -> bool {
        matches!(self, RegisterOutcome::AwaitingLanguage { newly_added: true })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationCounts {
    pub total: usize,
    pub zh: usize,
    pub en: usize,
    pub both: usize,
}

impl Registrations {
    pub fn registered_users(&self) -> &[UserId] {
        &self.registered_users
    }

    pub fn languages(&self) -> &BTreeMap<UserId, Language> {
        &self.lang
    }

    pub fn len(&self) -> usize {
        self.registered_users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered_users.is_empty()
    }

    pub fn is_registered(&self, user_id: UserId) -> bool {
        self.registered_users.contains(&user_id)
    }

    pub fn language_of(&self, user_id: UserId) -> Option<Language> {
        self.lang.get(&user_id).copied()
    }

    /// Returns true if the user was not registered before.
    pub fn register(&mut self, user_id: UserId) -> bool {
        if self.is_registered(user_id) {
            return false;
        }
        self.registered_users.push(user_id);
        true
    }

    /// A recorded language is terminal and never overwritten.
    pub fn set_language(&mut self, user_id: UserId, language: Language) -> LanguageOutcome {
        if !self.is_registered(user_id) {
            return LanguageOutcome::NotRegistered;
        }
        if let Some(existing) = self.language_of(user_id) {
            return LanguageOutcome::AlreadyChosen(existing);
        }
        self.lang.insert(user_id, language);
        LanguageOutcome::Recorded
    }

    /// Registration decision for one press of the register button.
    ///
    /// A closed window rejects regardless of prior state. A user who is
    /// registered without a language is let through again so they can get
    /// a fresh language prompt.
    pub fn attempt_register(&mut self, user_id: UserId, window_open: bool) -> RegisterOutcome {
        if !window_open {
            return RegisterOutcome::WindowClosed;
        }
        if self.is_registered(user_id)
            && let Some(language) = self.language_of(user_id)
        {
            return RegisterOutcome::AlreadyRegistered(language);
        }
        RegisterOutcome::AwaitingLanguage {
            newly_added: self.register(user_id),
        }
    }

    /// Users who chose `language`, in registration order.
    pub fn bucket(&self, language: Language) -> Vec<UserId> {
        self.registered_users
            .iter()
            .copied()
            .filter(|user_id| self.language_of(*user_id) == Some(language))
            .collect()
    }

    pub fn counts(&self) -> RegistrationCounts {
        let mut counts = RegistrationCounts {
            total: self.registered_users.len(),
            ..RegistrationCounts::default()
        };
        for user_id in &self.registered_users {
            match self.language_of(*user_id) {
                Some(Language::Zh) => counts.zh += 1,
                Some(Language::En) => counts.en += 1,
                Some(Language::Both) => counts.both += 1,
                None => {}
            }
        }
        counts
    }
}

/// The interval during which registration is accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationWindow {
    pub start_time: DateTime<FixedOffset>,
    pub deadline: DateTime<FixedOffset>,
}

impl RegistrationWindow {
    /// Window opening at `now` and closing `days_ahead` calendar days later at
    /// `deadline_hour:00`, both in the offset `now` carries.
    pub fn opening_at(
        now: DateTime<FixedOffset>,
        days_ahead: u64,
        deadline_hour: u32,
    ) -> Option<Self> {
        let deadline = deadline_after(now, days_ahead, deadline_hour)?;
        Some(Self {
            start_time: now.trunc_subsecs(6),
            deadline,
        })
    }

    pub fn is_open_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        *now <= self.deadline
    }
}

pub fn deadline_after(
    now: DateTime<FixedOffset>,
    days_ahead: u64,
    deadline_hour: u32,
) -> Option<DateTime<FixedOffset>> {
    let naive = now
        .date_naive()
        .checked_add_days(Days::new(days_ahead))?
        .and_hms_opt(deadline_hour, 0, 0)?;
    now.timezone().from_local_datetime(&naive).single()
}

/// Members of one team after allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRoster {
    pub team: String,
    pub members: Vec<UserId>,
}

/// Partition registered users into teams.
///
/// `zh` and `en` users are split evenly across the teams of matching
/// affinity, the first `count % teams` of them taking one extra user.
/// `both` users are then dealt one at a time, English teams first and then
/// Chinese teams, cycling until none are left. Users without a language are
/// skipped. Every bucket is walked in registration order so identical input
/// always produces identical rosters.
pub fn allocate_teams(registrations: &Registrations, config: &TeamConfig) -> Vec<TeamRoster> {
    let mut rosters: Vec<TeamRoster> = config
        .teams()
        .iter()
        .map(|team| TeamRoster {
            team: team.name.clone(),
            members: Vec::new(),
        })
        .collect();

    for language in [Language::Zh, Language::En] {
        let indices = config.indices_with_affinity(language);
        if indices.is_empty() {
            continue;
        }
        let users = registrations.bucket(language);
        let per_team = users.len() / indices.len();
        let remainder = users.len() % indices.len();

        let mut users = users.into_iter();
        for (position, index) in indices.iter().enumerate() {
            let take = per_team + usize::from(position < remainder);
            rosters[*index].members.extend(users.by_ref().take(take));
        }
    }

    let mut both_order = config.indices_with_affinity(Language::En);
    both_order.extend(config.indices_with_affinity(Language::Zh));
    for (user_id, index) in registrations
        .bucket(Language::Both)
        .into_iter()
        .zip(both_order.iter().cycle())
    {
        rosters[*index].members.push(user_id);
    }

    rosters
}

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is a valid regex")
});

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}
