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

//! Team role side effects: revoking last cycle's grants and granting the
//! freshly allocated rosters. Both are best effort per member.

use std::collections::BTreeMap;

use signup_common::{Registrations, TeamConfig, TeamRoster, UserId, allocate_teams};
use tracing::{debug, info, warn};

use crate::platform::{ChatPlatform, GuildId, Role};

async fn team_role(platform: &dyn ChatPlatform, guild_id: GuildId, team: &str) -> Option<Role> {
    match platform.role_by_name(guild_id, team).await {
        Ok(Some(role)) => Some(role),
        Ok(None) => {
            warn!(guild_id, team = %team, "team role not found in guild; skipping team");
            None
        }
        Err(error) => {
            warn!(guild_id, team = %team, error = %error, "failed to look up team role; skipping team");
            None
        }
    }
}

/// Remove every team role from the previously registered users.
///
/// Returns how many members lost each team's role. Teams whose role is
/// missing from the guild report zero.
pub async fn revoke_all_team_roles(
    platform: &dyn ChatPlatform,
    guild_id: GuildId,
    previous_users: &[UserId],
    teams: &TeamConfig,
) -> BTreeMap<String, usize> {
    let mut removals: BTreeMap<String, usize> =
        teams.names().map(|team| (team.to_string(), 0)).collect();

    for team in teams.names() {
        let Some(role) = team_role(platform, guild_id, team).await else {
            continue;
        };

        let mut removed = 0usize;
        for &user_id in previous_users {
            let member = match platform.fetch_member(guild_id, user_id).await {
                Ok(Some(member)) => member,
                Ok(None) => {
                    debug!(user_id, "member not found in guild during role cleanup");
                    continue;
                }
                Err(error) => {
                    warn!(user_id, error = %error, "failed to fetch member during role cleanup");
                    continue;
                }
            };

            if !member.has_role(&role) {
                continue;
            }

            match platform.revoke_role(guild_id, &member, &role).await {
                Ok(()) => removed += 1,
                Err(error) => {
                    warn!(user_id, team = %team, error = %error, "failed to revoke team role")
                }
            }
        }

        removals.insert(team.to_string(), removed);
    }

    removals
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentReport {
    pub rosters: Vec<TeamRoster>,
    pub granted: usize,
    pub skipped: usize,
}

impl AssignmentReport {
    /// One line per team in declaration order.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "Roles have been successfully assigned to users based on their language selection."
                .to_string(),
        ];
        for roster in &self.rosters {
            lines.push(format!("Team {}: {} members", roster.team, roster.members.len()));
        }
        if self.skipped > 0 {
            lines.push(format!("{} members could not be given their team role.", self.skipped));
        }
        lines.join("\n")
    }
}

/// Allocate the registered users and grant each one their team's role.
///
/// The rosters are computed up front; grant failures only show up in the
/// `skipped` count.
pub async fn assign_team_roles(
    platform: &dyn ChatPlatform,
    guild_id: GuildId,
    registrations: &Registrations,
    teams: &TeamConfig,
) -> AssignmentReport {
    let rosters = allocate_teams(registrations, teams);
    let mut granted = 0usize;
    let mut skipped = 0usize;

    for roster in &rosters {
        info!(team = %roster.team, member_count = roster.members.len(), "allocated team");

        let Some(role) = team_role(platform, guild_id, &roster.team).await else {
            skipped += roster.members.len();
            continue;
        };

        for &user_id in &roster.members {
            let member = match platform.fetch_member(guild_id, user_id).await {
                Ok(Some(member)) => member,
                Ok(None) => {
                    debug!(user_id, team = %roster.team, "member not found in guild; skipping grant");
                    skipped += 1;
                    continue;
                }
                Err(error) => {
                    warn!(user_id, team = %roster.team, error = %error, "failed to fetch member for grant");
                    skipped += 1;
                    continue;
                }
            };

            match platform.grant_role(guild_id, &member, &role).await {
                Ok(()) => granted += 1,
                Err(error) => {
                    warn!(user_id, team = %roster.team, error = %error, "failed to grant team role");
                    skipped += 1;
                }
            }
        }
    }

    AssignmentReport {
        rosters,
        granted,
        skipped,
    }
}
