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

//! Chat platform collaborator: the outbound calls the workflow makes and the
//! inbound command/component payloads it receives.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use signup_common::UserId;

pub type GuildId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type RoleId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

impl Button {
    pub fn new(custom_id: impl Into<String>, label: impl Into<String>, style: ButtonStyle) -> Self {
        Self {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    #[serde(default)]
    pub components: Vec<Button>,
    #[serde(default)]
    pub ephemeral: bool,
}

impl OutgoingMessage {
    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            components: Vec::new(),
            ephemeral: false,
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            components: Vec::new(),
            ephemeral: true,
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.components = buttons;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

impl Member {
    pub fn has_role(&self, role: &Role) -> bool {
        self.role_ids.contains(&role.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// A chat command typed by a member, e.g. `start-cycle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub name: String,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    /// Role names held by the invoking member.
    #[serde(default)]
    pub member_roles: Vec<String>,
}

impl CommandInvocation {
    pub fn message(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

/// A button press on a message the service posted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub custom_id: String,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
}

impl Interaction {
    pub fn message(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

/// The single initial response owed to every command and interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionResponse {
    Message(OutgoingMessage),
    Acknowledge,
}

impl InteractionResponse {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self::Message(OutgoingMessage::ephemeral(content))
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self::Message(OutgoingMessage::public(content))
    }
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        message: &OutgoingMessage,
    ) -> anyhow::Result<MessageRef>;

    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()>;

    /// `Ok(None)` when the user is not a member of the guild.
    async fn fetch_member(&self, guild_id: GuildId, user_id: UserId)
    -> anyhow::Result<Option<Member>>;

    async fn role_by_name(&self, guild_id: GuildId, name: &str) -> anyhow::Result<Option<Role>>;

    async fn grant_role(&self, guild_id: GuildId, member: &Member, role: &Role)
    -> anyhow::Result<()>;

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        member: &Member,
        role: &Role,
    ) -> anyhow::Result<()>;
}

/// REST client for the chat gateway.
#[derive(Clone)]
pub struct HttpChatPlatform {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    message_id: MessageId,
}

impl HttpChatPlatform {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn ensure_success(
        response: reqwest::Response,
        action: &str,
    ) -> anyhow::Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            anyhow::bail!("chat gateway returned {status} while trying to {action}: {body}");
        }
        Ok(response)
    }

    fn role_path(guild_id: GuildId, member: &Member, role: &Role) -> String {
        format!(
            "guilds/{guild_id}/members/{}/roles/{}",
            member.user_id, role.id
        )
    }
}

#[async_trait]
impl ChatPlatform for HttpChatPlatform {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        message: &OutgoingMessage,
    ) -> anyhow::Result<MessageRef> {
        let response = self
            .client
            .post(self.endpoint(&format!("channels/{channel_id}/messages")))
            .json(message)
            .send()
            .await
            .context("failed to call chat gateway")?;
        let created = Self::ensure_success(response, "send a message")
            .await?
            .json::<CreatedMessage>()
            .await
            .context("invalid chat gateway message payload")?;
        Ok(MessageRef {
            channel_id,
            message_id: created.message_id,
        })
    }

    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&format!(
                "channels/{}/messages/{}",
                message.channel_id, message.message_id
            )))
            .send()
            .await
            .context("failed to call chat gateway")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::ensure_success(response, "delete a message").await?;
        Ok(())
    }

    async fn fetch_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> anyhow::Result<Option<Member>> {
        let response = self
            .client
            .get(self.endpoint(&format!("guilds/{guild_id}/members/{user_id}")))
            .send()
            .await
            .context("failed to call chat gateway")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let member = Self::ensure_success(response, "fetch a member")
            .await?
            .json::<Member>()
            .await
            .context("invalid chat gateway member payload")?;
        Ok(Some(member))
    }

    async fn role_by_name(&self, guild_id: GuildId, name: &str) -> anyhow::Result<Option<Role>> {
        let response = self
            .client
            .get(self.endpoint(&format!("guilds/{guild_id}/roles")))
            .send()
            .await
            .context("failed to call chat gateway")?;
        let roles = Self::ensure_success(response, "list roles")
            .await?
            .json::<Vec<Role>>()
            .await
            .context("invalid chat gateway roles payload")?;
        Ok(roles.into_iter().find(|role| role.name == name))
    }

    async fn grant_role(
        &self,
        guild_id: GuildId,
        member: &Member,
        role: &Role,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .put(self.endpoint(&Self::role_path(guild_id, member, role)))
            .send()
            .await
            .context("failed to call chat gateway")?;
        Self::ensure_success(response, "grant a role").await?;
        Ok(())
    }

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        member: &Member,
        role: &Role,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&Self::role_path(guild_id, member, role)))
            .send()
            .await
            .context("failed to call chat gateway")?;
        Self::ensure_success(response, "revoke a role").await?;
        Ok(())
    }
}
