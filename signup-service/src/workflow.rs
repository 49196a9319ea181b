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

//! Registration workflow.
//!
//! Admin side: `start-cycle` posts a confirmation prompt, a second prompt
//! follows, and accepting that one resets the cycle (role cleanup, store
//! clear, new window) and posts the registration entry message.
//!
//! User side: the `register` button records the user and answers with an
//! ephemeral language prompt; picking a language records it for good.
//!
//! Every button press is decided by a transition over the in-memory prompt
//! sessions, which yields the single response owed to the platform plus a
//! list of effects run afterwards.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use signup_common::{Language, LanguageOutcome, RegisterOutcome, UserId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::CycleConfig,
    deadline::{DeadlineManager, WindowStore},
    platform::{
        Button, ButtonStyle, ChannelId, ChatPlatform, CommandInvocation, GuildId, Interaction,
        InteractionResponse, MessageRef, OutgoingMessage,
    },
    roles::{assign_team_roles, revoke_all_team_roles},
    store::{RegistrationLedger, RegistrationStore},
};

pub const REGISTER_BUTTON_ID: &str = "register";

const START_PROMPT: &str = "Start a new game?";
const CONFIRM_AGAIN_PROMPT: &str = "Confirm again to proceed...";
const NOT_FOR_YOU: &str = "This button isn't for you.";
const CANCELLED: &str = "Cancel...";
const CONFIRMATION_EXPIRED: &str = "This confirmation has expired.";
const RESETTING: &str = "A new game will begin. Reset all user data...";
const PERIOD_OVER: &str = "註冊時間已結束！\nRegistration period is over!";
const ALREADY_REGISTERED: &str =
    "你已經註冊並選擇語言了！\nYou are already registered and have chosen a language!";
const LANGUAGE_PROMPT: &str = "# 請選擇語言 | Please select language\n\
選擇 **[兩者都可]** 將會隨機進入中文或英文頻道\n\
Select **[Both]** will enter the Chinese or English channel randomly.\n\
\n**此選擇無法更改請謹慎選擇 | This selection cannot be changed; choose carefully.**";
const ALREADY_CHOSEN: &str = "您已經選擇了一種語言！ | You already selected a language!";
const LANGUAGE_PROMPT_EXPIRED: &str =
    "此選單已失效，請重新按下註冊按鈕。\nThis prompt has expired, please press Register again.";
const REGISTER_FIRST: &str = "請先按下註冊按鈕！\nPlease press the register button first!";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Chat commands the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    StartCycle,
    AssignTeams,
    DisplayRoles,
}

impl AdminCommand {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "start-cycle" => Some(Self::StartCycle),
            "assign-teams" => Some(Self::AssignTeams),
            "display-roles" => Some(Self::DisplayRoles),
            _ => None,
        }
    }

    fn requires_admin(self) -> bool {
        !matches!(self, Self::DisplayRoles)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStage {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmChoice {
    Accept,
    Cancel,
}

impl ConfirmChoice {
    fn code(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Cancel => "cancel",
        }
    }
}

/// A button press, decoded from its custom id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    AdminConfirm {
        prompt_id: Uuid,
        choice: ConfirmChoice,
    },
    UserRegister,
    UserPickLanguage {
        prompt_id: Uuid,
        language: Language,
    },
}

impl WorkflowEvent {
    pub fn parse(custom_id: &str) -> Option<Self> {
        if custom_id == REGISTER_BUTTON_ID {
            return Some(Self::UserRegister);
        }

        let mut parts = custom_id.split(':');
        let (Some(kind), Some(prompt_id), Some(value), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        let prompt_id = Uuid::parse_str(prompt_id).ok()?;

        match kind {
            "confirm" => {
                let choice = match value {
                    "accept" => ConfirmChoice::Accept,
                    "cancel" => ConfirmChoice::Cancel,
                    _ => return None,
                };
                Some(Self::AdminConfirm { prompt_id, choice })
            }
            "language" => Some(Self::UserPickLanguage {
                prompt_id,
                language: Language::parse(value)?,
            }),
            _ => None,
        }
    }
}

fn confirm_button_id(prompt_id: Uuid, choice: ConfirmChoice) -> String {
    format!("confirm:{prompt_id}:{}", choice.code())
}

fn language_button_id(prompt_id: Uuid, language: Language) -> String {
    format!("language:{prompt_id}:{}", language.code())
}

#[derive(Debug, Clone)]
pub struct ConfirmationPrompt {
    pub admin_id: UserId,
    pub stage: ConfirmStage,
    pub message: Option<MessageRef>,
    pub expires_at: DateTime<Utc>,
}

/// One rendered language prompt and the users who already answered it.
///
/// The prompt is ephemeral, so `owner` is the only user who can press it;
/// each user holds at most one live prompt.
#[derive(Debug, Clone)]
pub struct LanguagePrompt {
    pub owner: UserId,
    pub resolved: HashSet<UserId>,
}

impl LanguagePrompt {
    fn new(owner: UserId) -> Self {
        Self {
            owner,
            resolved: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageClaim {
    Claimed,
    Unknown,
    AlreadyClaimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmResolution {
    Expired,
    NotForYou,
    Cancelled,
    Advance,
    ExecuteReset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Delete(MessageRef),
    PostConfirmation {
        guild_id: GuildId,
        channel_id: ChannelId,
        admin_id: UserId,
        stage: ConfirmStage,
    },
    ResetCycle {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub response: InteractionResponse,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn reply(response: InteractionResponse) -> Self {
        Self {
            response,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Live prompt sessions. None of this is persisted.
#[derive(Debug, Default)]
pub struct PromptBook {
    pub confirmations: HashMap<Uuid, ConfirmationPrompt>,
    pub language_prompts: HashMap<Uuid, LanguagePrompt>,
}

pub fn resolve_confirmation(
    prompt: Option<&ConfirmationPrompt>,
    actor: UserId,
    choice: ConfirmChoice,
    now: DateTime<Utc>,
) -> ConfirmResolution {
    let Some(prompt) = prompt else {
        return ConfirmResolution::Expired;
    };
    if prompt.admin_id != actor {
        return ConfirmResolution::NotForYou;
    }
    if now > prompt.expires_at {
        return ConfirmResolution::Expired;
    }
    match (choice, prompt.stage) {
        (ConfirmChoice::Cancel, _) => ConfirmResolution::Cancelled,
        (ConfirmChoice::Accept, ConfirmStage::First) => ConfirmResolution::Advance,
        (ConfirmChoice::Accept, ConfirmStage::Second) => ConfirmResolution::ExecuteReset,
    }
}

impl PromptBook {
    /// Admin pressed a confirmation button on `interaction.message()`.
    pub fn confirm(
        &mut self,
        prompt_id: Uuid,
        choice: ConfirmChoice,
        interaction: &Interaction,
        now: DateTime<Utc>,
    ) -> Transition {
        let resolution = resolve_confirmation(
            self.confirmations.get(&prompt_id),
            interaction.user_id,
            choice,
            now,
        );
        if resolution == ConfirmResolution::NotForYou {
            return Transition::reply(InteractionResponse::ephemeral(NOT_FOR_YOU));
        }

        let admin_id = self
            .confirmations
            .remove(&prompt_id)
            .map(|prompt| prompt.admin_id)
            .unwrap_or(interaction.user_id);
        let delete_prompt = Effect::Delete(interaction.message());

        match resolution {
            ConfirmResolution::Expired | ConfirmResolution::NotForYou => {
                Transition::reply(InteractionResponse::ephemeral(CONFIRMATION_EXPIRED))
                    .with(delete_prompt)
            }
            ConfirmResolution::Cancelled => {
                Transition::reply(InteractionResponse::ephemeral(CANCELLED)).with(delete_prompt)
            }
            ConfirmResolution::Advance => Transition::reply(InteractionResponse::Acknowledge)
                .with(delete_prompt)
                .with(Effect::PostConfirmation {
                    guild_id: interaction.guild_id,
                    channel_id: interaction.channel_id,
                    admin_id,
                    stage: ConfirmStage::Second,
                }),
            ConfirmResolution::ExecuteReset => {
                Transition::reply(InteractionResponse::ephemeral(RESETTING))
                    .with(delete_prompt)
                    .with(Effect::ResetCycle {
                        guild_id: interaction.guild_id,
                        channel_id: interaction.channel_id,
                    })
            }
        }
    }

    /// Open a language prompt session after a successful register press,
    /// replacing any prompt the user still holds.
    pub fn register(&mut self, user_id: UserId, outcome: RegisterOutcome) -> Transition {
        match outcome {
            RegisterOutcome::WindowClosed => {
                Transition::reply(InteractionResponse::ephemeral(PERIOD_OVER))
            }
            RegisterOutcome::AlreadyRegistered(_) => {
                Transition::reply(InteractionResponse::ephemeral(ALREADY_REGISTERED))
            }
            RegisterOutcome::AwaitingLanguage { .. } => {
                let prompt_id = Uuid::new_v4();
                self.language_prompts
                    .retain(|_, prompt| prompt.owner != user_id);
                self.language_prompts
                    .insert(prompt_id, LanguagePrompt::new(user_id));
                Transition::reply(InteractionResponse::Message(language_prompt(prompt_id)))
            }
        }
    }

    /// Claim `user_id`'s single answer on a language prompt.
    pub fn claim_language_pick(&mut self, prompt_id: Uuid, user_id: UserId) -> LanguageClaim {
        let Some(prompt) = self.language_prompts.get_mut(&prompt_id) else {
            return LanguageClaim::Unknown;
        };
        if !prompt.resolved.insert(user_id) {
            return LanguageClaim::AlreadyClaimed;
        }
        LanguageClaim::Claimed
    }

    /// Close the session once the record holds a language; otherwise hand the
    /// claim back so the user can answer again.
    pub fn settle_language_pick(
        &mut self,
        prompt_id: Uuid,
        user_id: UserId,
        outcome: LanguageOutcome,
    ) {
        match outcome {
            LanguageOutcome::Recorded | LanguageOutcome::AlreadyChosen(_) => {
                self.language_prompts.remove(&prompt_id);
            }
            LanguageOutcome::NotRegistered => self.release_language_pick(prompt_id, user_id),
        }
    }

    pub fn release_language_pick(&mut self, prompt_id: Uuid, user_id: UserId) {
        if let Some(prompt) = self.language_prompts.get_mut(&prompt_id) {
            prompt.resolved.remove(&user_id);
        }
    }
}

/// Reply to a recorded (or refused) language pick on `prompt`.
pub fn language_picked(
    outcome: LanguageOutcome,
    language: Language,
    prompt: MessageRef,
) -> Transition {
    match outcome {
        LanguageOutcome::Recorded => {
            Transition::reply(InteractionResponse::ephemeral(language_acknowledgement(language)))
                .with(Effect::Delete(prompt))
        }
        LanguageOutcome::AlreadyChosen(_) => {
            Transition::reply(InteractionResponse::ephemeral(ALREADY_CHOSEN))
                .with(Effect::Delete(prompt))
        }
        LanguageOutcome::NotRegistered => {
            Transition::reply(InteractionResponse::ephemeral(REGISTER_FIRST))
        }
    }
}

fn language_acknowledgement(language: Language) -> &'static str {
    match language {
        Language::Zh => "已註冊!!",
        Language::En => "REGISTERED!!",
        Language::Both => "已註冊!! | REGISTERED!!",
    }
}

fn language_prompt(prompt_id: Uuid) -> OutgoingMessage {
    OutgoingMessage::ephemeral(LANGUAGE_PROMPT).with_buttons(vec![
        Button::new(
            language_button_id(prompt_id, Language::Zh),
            "中文",
            ButtonStyle::Success,
        ),
        Button::new(
            language_button_id(prompt_id, Language::En),
            "英文",
            ButtonStyle::Primary,
        ),
        Button::new(
            language_button_id(prompt_id, Language::Both),
            "兩者都可 | Both",
            ButtonStyle::Secondary,
        ),
    ])
}

fn confirmation_message(prompt_id: Uuid, stage: ConfirmStage) -> OutgoingMessage {
    let content = match stage {
        ConfirmStage::First => START_PROMPT,
        ConfirmStage::Second => CONFIRM_AGAIN_PROMPT,
    };
    OutgoingMessage::public(content).with_buttons(vec![
        Button::new(
            confirm_button_id(prompt_id, ConfirmChoice::Accept),
            "Confirm",
            ButtonStyle::Success,
        ),
        Button::new(
            confirm_button_id(prompt_id, ConfirmChoice::Cancel),
            "Cancel",
            ButtonStyle::Danger,
        ),
    ])
}

fn registration_entry(deadline: DateTime<FixedOffset>) -> OutgoingMessage {
    OutgoingMessage::public(format!(
        "請於這裏按下按鈕註冊 \n Please press button to register.\n 註冊截止時間 | Registration deadline : <t:{}:F>",
        deadline.timestamp()
    ))
    .with_buttons(vec![Button::new(
        REGISTER_BUTTON_ID,
        "註冊 | Register",
        ButtonStyle::Primary,
    )])
}

pub struct Workflow {
    platform: Arc<dyn ChatPlatform>,
    ledger: RegistrationLedger,
    deadlines: DeadlineManager,
    cycle: CycleConfig,
    clock: Arc<dyn Clock>,
    prompts: Mutex<PromptBook>,
}

impl Workflow {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        registrations: Arc<dyn RegistrationStore>,
        windows: Arc<dyn WindowStore>,
        cycle: CycleConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let deadlines = DeadlineManager::new(
            windows,
            cycle.utc_offset,
            cycle.deadline_days_ahead,
            cycle.deadline_hour,
        );
        Arc::new(Self {
            platform,
            ledger: RegistrationLedger::new(registrations),
            deadlines,
            cycle,
            clock,
            prompts: Mutex::new(PromptBook::default()),
        })
    }

    pub async fn handle_command(
        self: &Arc<Self>,
        command: AdminCommand,
        invocation: &CommandInvocation,
    ) -> anyhow::Result<InteractionResponse> {
        if command.requires_admin()
            && !invocation
                .member_roles
                .iter()
                .any(|role| *role == self.cycle.admin_role)
        {
            debug!(user_id = invocation.user_id, command = ?command, "admin command refused");
            return Ok(InteractionResponse::ephemeral(format!(
                "You need the {} role to use this command.",
                self.cycle.admin_role
            )));
        }

        match command {
            AdminCommand::StartCycle => {
                info!(user_id = invocation.user_id, "new cycle requested");
                self.run_effects(vec![
                    Effect::Delete(invocation.message()),
                    Effect::PostConfirmation {
                        guild_id: invocation.guild_id,
                        channel_id: invocation.channel_id,
                        admin_id: invocation.user_id,
                        stage: ConfirmStage::First,
                    },
                ])
                .await?;
                Ok(InteractionResponse::Acknowledge)
            }
            AdminCommand::AssignTeams => {
                let registrations = self.ledger.snapshot().await;
                let report = assign_team_roles(
                    self.platform.as_ref(),
                    invocation.guild_id,
                    &registrations,
                    &self.cycle.teams,
                )
                .await;
                info!(
                    granted = report.granted,
                    skipped = report.skipped,
                    "team roles assigned"
                );
                Ok(InteractionResponse::public(report.summary()))
            }
            AdminCommand::DisplayRoles => {
                let counts = self.ledger.snapshot().await.counts();
                Ok(InteractionResponse::public(format!(
                    "Registration Summary\nTotal Users: {}\nZH Users: {}\nEN Users: {}\nBoth Users: {}",
                    counts.total, counts.zh, counts.en, counts.both
                )))
            }
        }
    }

    pub async fn handle_interaction(
        self: &Arc<Self>,
        event: WorkflowEvent,
        interaction: &Interaction,
    ) -> anyhow::Result<InteractionResponse> {
        let transition = match event {
            WorkflowEvent::AdminConfirm { prompt_id, choice } => {
                let now = self.clock.now();
                self.prompts
                    .lock()
                    .await
                    .confirm(prompt_id, choice, interaction, now)
            }
            WorkflowEvent::UserRegister => self.register(interaction.user_id).await?,
            WorkflowEvent::UserPickLanguage {
                prompt_id,
                language,
            } => self.pick_language(prompt_id, language, interaction).await?,
        };

        self.run_effects(transition.effects).await?;
        Ok(transition.response)
    }

    async fn register(&self, user_id: UserId) -> anyhow::Result<Transition> {
        let window_open = self.deadlines.is_open(self.clock.now()).await;
        let outcome = self
            .ledger
            .mutate(|registrations| registrations.attempt_register(user_id, window_open))
            .await
            .context("failed to save registration")?;

        match outcome {
            RegisterOutcome::AwaitingLanguage { newly_added: true } => {
                info!(user_id, "user registered")
            }
            _ => debug!(user_id, outcome = ?outcome, "register press"),
        }
        Ok(self.prompts.lock().await.register(user_id, outcome))
    }

    async fn pick_language(
        &self,
        prompt_id: Uuid,
        language: Language,
        interaction: &Interaction,
    ) -> anyhow::Result<Transition> {
        let user_id = interaction.user_id;
        if !self.deadlines.is_open(self.clock.now()).await {
            return Ok(Transition::reply(InteractionResponse::ephemeral(PERIOD_OVER)));
        }

        let claim = self
            .prompts
            .lock()
            .await
            .claim_language_pick(prompt_id, user_id);
        match claim {
            LanguageClaim::Claimed => {}
            LanguageClaim::AlreadyClaimed => {
                return Ok(Transition::reply(InteractionResponse::ephemeral(ALREADY_CHOSEN)));
            }
            LanguageClaim::Unknown => {
                let chosen = self.ledger.snapshot().await.language_of(user_id).is_some();
                let reply = if chosen {
                    ALREADY_CHOSEN
                } else {
                    LANGUAGE_PROMPT_EXPIRED
                };
                return Ok(Transition::reply(InteractionResponse::ephemeral(reply)));
            }
        }

        let outcome = match self
            .ledger
            .mutate(|registrations| registrations.set_language(user_id, language))
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                self.prompts
                    .lock()
                    .await
                    .release_language_pick(prompt_id, user_id);
                return Err(error.context("failed to save language choice"));
            }
        };

        self.prompts
            .lock()
            .await
            .settle_language_pick(prompt_id, user_id, outcome);

        if outcome == LanguageOutcome::Recorded {
            info!(user_id, language = language.code(), "language recorded");
        } else {
            debug!(user_id, outcome = ?outcome, "language pick refused");
        }
        Ok(language_picked(outcome, language, interaction.message()))
    }

    async fn run_effects(self: &Arc<Self>, effects: Vec<Effect>) -> anyhow::Result<()> {
        for effect in effects {
            match effect {
                Effect::Delete(message) => self.delete_quietly(message).await,
                Effect::PostConfirmation {
                    guild_id,
                    channel_id,
                    admin_id,
                    stage,
                } => {
                    self.post_confirmation(guild_id, channel_id, admin_id, stage)
                        .await?
                }
                Effect::ResetCycle {
                    guild_id,
                    channel_id,
                } => self.reset_cycle(guild_id, channel_id).await?,
            }
        }
        Ok(())
    }

    async fn delete_quietly(&self, message: MessageRef) {
        if let Err(error) = self.platform.delete_message(message).await {
            warn!(
                channel_id = message.channel_id,
                message_id = message.message_id,
                error = %error,
                "failed to delete message"
            );
        }
    }

    async fn post_confirmation(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
        admin_id: UserId,
        stage: ConfirmStage,
    ) -> anyhow::Result<()> {
        let timeout = match stage {
            ConfirmStage::First => self.cycle.first_confirm_timeout,
            ConfirmStage::Second => self.cycle.second_confirm_timeout,
        };
        let expires_at = TimeDelta::from_std(timeout)
            .ok()
            .and_then(|timeout| self.clock.now().checked_add_signed(timeout))
            .context("confirmation timeout is out of range")?;

        let prompt_id = Uuid::new_v4();
        self.prompts.lock().await.confirmations.insert(
            prompt_id,
            ConfirmationPrompt {
                admin_id,
                stage,
                message: None,
                expires_at,
            },
        );

        let sent = self
            .platform
            .send_message(channel_id, &confirmation_message(prompt_id, stage))
            .await;
        let message = match sent {
            Ok(message) => message,
            Err(error) => {
                self.prompts.lock().await.confirmations.remove(&prompt_id);
                return Err(error.context("failed to post confirmation prompt"));
            }
        };
        if let Some(prompt) = self.prompts.lock().await.confirmations.get_mut(&prompt_id) {
            prompt.message = Some(message);
        }

        info!(guild_id, admin_id, stage = ?stage, prompt_id = %prompt_id, "confirmation prompt posted");
        self.schedule_expiry(prompt_id, timeout);
        Ok(())
    }

    fn schedule_expiry(self: &Arc<Self>, prompt_id: Uuid, timeout: Duration) {
        let workflow = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            workflow.expire_confirmation(prompt_id).await;
        });
    }

    async fn expire_confirmation(&self, prompt_id: Uuid) {
        let Some(prompt) = self.prompts.lock().await.confirmations.remove(&prompt_id) else {
            return;
        };
        info!(prompt_id = %prompt_id, stage = ?prompt.stage, "confirmation prompt expired");
        if let Some(message) = prompt.message {
            self.delete_quietly(message).await;
        }
    }

    /// Role cleanup, store clear and a fresh window, all under the ledger
    /// lock so no registration lands half way through.
    async fn reset_cycle(&self, guild_id: GuildId, channel_id: ChannelId) -> anyhow::Result<()> {
        let window = {
            let ledger = self.ledger.lock().await;
            let previous = ledger.load().await;
            let removals = revoke_all_team_roles(
                self.platform.as_ref(),
                guild_id,
                previous.registered_users(),
                &self.cycle.teams,
            )
            .await;
            info!(
                guild_id,
                previous_users = previous.len(),
                removals = ?removals,
                "team roles revoked"
            );

            ledger
                .clear()
                .await
                .context("failed to clear registrations")?;
            self.deadlines.start_cycle(self.clock.now()).await?
        };

        self.prompts.lock().await.language_prompts.clear();

        self.platform
            .send_message(channel_id, &registration_entry(window.deadline))
            .await
            .context("failed to post registration entry")?;
        info!(guild_id, deadline = %window.deadline, "registration opened");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use signup_common::{RegistrationWindow, Registrations};

    use super::testing::FixedClock;
    use super::*;
    use crate::{
        deadline::testing::MemoryWindowStore,
        platform::{MessageId, testing::FakeGuild},
        store::testing::MemoryRegistrationStore,
    };

    const GUILD: GuildId = 77;
    const CHANNEL: ChannelId = 88;
    const ADMIN: UserId = 1;
    const TEAMS: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

    struct Harness {
        workflow: Arc<Workflow>,
        guild: Arc<FakeGuild>,
        registrations: Arc<MemoryRegistrationStore>,
        windows: Arc<MemoryWindowStore>,
        clock: Arc<FixedClock>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 4, 0, 0).unwrap()
    }

    fn harness_with(cycle: CycleConfig, record: Registrations) -> Harness {
        let guild = Arc::new(FakeGuild::with_team_roles(&TEAMS));
        let registrations = Arc::new(MemoryRegistrationStore::with(record));
        let windows = Arc::new(MemoryWindowStore::default());
        let clock = Arc::new(FixedClock::at(start()));
        let workflow = Workflow::new(
            guild.clone(),
            registrations.clone(),
            windows.clone(),
            cycle,
            clock.clone(),
        );
        Harness {
            workflow,
            guild,
            registrations,
            windows,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(CycleConfig::default(), Registrations::default())
    }

    fn open_harness() -> Harness {
        let harness = harness();
        let local = start().with_timezone(&CycleConfig::default().utc_offset);
        *harness.windows.window.lock().unwrap() =
            Some(RegistrationWindow::opening_at(local, 2, 21).unwrap());
        harness
    }

    fn command(name: &str, user_id: UserId, roles: &[&str]) -> CommandInvocation {
        CommandInvocation {
            name: name.to_string(),
            guild_id: GUILD,
            channel_id: CHANNEL,
            message_id: 42,
            user_id,
            member_roles: roles.iter().map(|role| role.to_string()).collect(),
        }
    }

    fn press(custom_id: &str, user_id: UserId, message_id: MessageId) -> Interaction {
        Interaction {
            custom_id: custom_id.to_string(),
            guild_id: GUILD,
            channel_id: CHANNEL,
            message_id,
            user_id,
        }
    }

    fn buttons(response: &InteractionResponse) -> Vec<Button> {
        match response {
            InteractionResponse::Message(message) => message.components.clone(),
            InteractionResponse::Acknowledge => Vec::new(),
        }
    }

    fn content(response: &InteractionResponse) -> String {
        match response {
            InteractionResponse::Message(message) => message.content.clone(),
            InteractionResponse::Acknowledge => String::new(),
        }
    }

    impl Harness {
        async fn run_command(&self, invocation: CommandInvocation) -> InteractionResponse {
            let command = AdminCommand::parse(&invocation.name).unwrap();
            self.workflow
                .handle_command(command, &invocation)
                .await
                .unwrap()
        }

        async fn click(&self, interaction: Interaction) -> InteractionResponse {
            let event = WorkflowEvent::parse(&interaction.custom_id).unwrap();
            self.workflow
                .handle_interaction(event, &interaction)
                .await
                .unwrap()
        }

        /// Press a button on the most recent channel message.
        async fn click_last_sent(&self, index: usize, user_id: UserId) -> InteractionResponse {
            let (_, message) = self.guild.last_sent();
            let message_id = 5000 + self.guild.sent.lock().unwrap().len() as MessageId;
            self.click(press(&message.components[index].custom_id, user_id, message_id))
                .await
        }

        async fn register(&self, user_id: UserId) -> InteractionResponse {
            self.click(press(REGISTER_BUTTON_ID, user_id, 9000)).await
        }

        async fn pick(
            &self,
            prompt: &InteractionResponse,
            language: Language,
            user_id: UserId,
        ) -> InteractionResponse {
            let index = Language::ALL
                .iter()
                .position(|candidate| *candidate == language)
                .unwrap();
            self.click(press(&buttons(prompt)[index].custom_id, user_id, 9100))
                .await
        }
    }

    #[test]
    fn custom_ids_parse_into_events() {
        let prompt_id = Uuid::new_v4();
        assert_eq!(
            WorkflowEvent::parse("register"),
            Some(WorkflowEvent::UserRegister)
        );
        assert_eq!(
            WorkflowEvent::parse(&confirm_button_id(prompt_id, ConfirmChoice::Cancel)),
            Some(WorkflowEvent::AdminConfirm {
                prompt_id,
                choice: ConfirmChoice::Cancel
            })
        );
        assert_eq!(
            WorkflowEvent::parse(&language_button_id(prompt_id, Language::Both)),
            Some(WorkflowEvent::UserPickLanguage {
                prompt_id,
                language: Language::Both
            })
        );
        assert_eq!(WorkflowEvent::parse("language:not-a-uuid:zh"), None);
        assert_eq!(
            WorkflowEvent::parse(&format!("language:{prompt_id}:fr")),
            None
        );
        assert_eq!(
            WorkflowEvent::parse(&format!("confirm:{prompt_id}:accept:extra")),
            None
        );
    }

    #[test]
    fn confirmation_resolution_checks_actor_before_expiry() {
        let prompt = ConfirmationPrompt {
            admin_id: ADMIN,
            stage: ConfirmStage::Second,
            message: None,
            expires_at: start(),
        };
        let later = start() + TimeDelta::seconds(1);
        assert_eq!(
            resolve_confirmation(Some(&prompt), 2, ConfirmChoice::Accept, start()),
            ConfirmResolution::NotForYou
        );
        assert_eq!(
            resolve_confirmation(Some(&prompt), ADMIN, ConfirmChoice::Accept, start()),
            ConfirmResolution::ExecuteReset
        );
        assert_eq!(
            resolve_confirmation(Some(&prompt), ADMIN, ConfirmChoice::Accept, later),
            ConfirmResolution::Expired
        );
        assert_eq!(
            resolve_confirmation(None, ADMIN, ConfirmChoice::Cancel, start()),
            ConfirmResolution::Expired
        );
    }

    #[tokio::test]
    async fn start_cycle_requires_admin_role() {
        let harness = harness();
        let response = harness.run_command(command("start-cycle", 5, &["Member"])).await;

        assert_eq!(
            response,
            InteractionResponse::ephemeral("You need the Admin role to use this command.")
        );
        assert!(harness.guild.sent.lock().unwrap().is_empty());
        assert!(harness.guild.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn double_confirmation_resets_the_cycle() {
        let mut previous = Registrations::default();
        previous.register(10);
        previous.set_language(10, Language::Zh);
        previous.register(11);
        let harness = harness_with(CycleConfig::default(), previous);
        harness.guild.add_member(10, &["A"]);
        harness.guild.add_member(11, &["G"]);

        let response = harness
            .run_command(command("start-cycle", ADMIN, &["Admin"]))
            .await;
        assert_eq!(response, InteractionResponse::Acknowledge);
        assert_eq!(
            harness.guild.deleted.lock().unwrap()[0],
            MessageRef {
                channel_id: CHANNEL,
                message_id: 42
            }
        );
        assert_eq!(harness.guild.sent_contents(), vec![START_PROMPT]);

        let response = harness.click_last_sent(0, 2).await;
        assert_eq!(response, InteractionResponse::ephemeral(NOT_FOR_YOU));
        assert_eq!(harness.guild.sent.lock().unwrap().len(), 1);

        let response = harness.click_last_sent(0, ADMIN).await;
        assert_eq!(response, InteractionResponse::Acknowledge);
        assert_eq!(
            harness.guild.sent_contents(),
            vec![START_PROMPT, CONFIRM_AGAIN_PROMPT]
        );

        let response = harness.click_last_sent(0, ADMIN).await;
        assert_eq!(response, InteractionResponse::ephemeral(RESETTING));

        assert!(harness.guild.member_role_names(10).is_empty());
        assert!(harness.guild.member_role_names(11).is_empty());
        assert!(harness.registrations.current().is_empty());

        let window = harness.windows.window.lock().unwrap().unwrap();
        let (channel_id, entry) = harness.guild.last_sent();
        assert_eq!(channel_id, CHANNEL);
        assert!(
            entry
                .content
                .ends_with(&format!("<t:{}:F>", window.deadline.timestamp()))
        );
        assert_eq!(entry.components[0].custom_id, REGISTER_BUTTON_ID);
        assert!(!entry.ephemeral);

        // command message plus both confirmation prompts
        assert_eq!(harness.guild.deleted.lock().unwrap().len(), 3);
        assert!(
            harness
                .workflow
                .prompts
                .lock()
                .await
                .confirmations
                .is_empty()
        );
    }

    #[tokio::test]
    async fn cancel_stops_before_the_second_prompt() {
        let harness = harness();
        harness
            .run_command(command("start-cycle", ADMIN, &["Admin"]))
            .await;

        let response = harness.click_last_sent(1, ADMIN).await;

        assert_eq!(response, InteractionResponse::ephemeral(CANCELLED));
        assert_eq!(harness.guild.sent_contents(), vec![START_PROMPT]);
        assert!(harness.windows.window.lock().unwrap().is_none());

        let again = harness.click_last_sent(0, ADMIN).await;
        assert_eq!(again, InteractionResponse::ephemeral(CONFIRMATION_EXPIRED));
    }

    #[tokio::test]
    async fn cancel_on_second_prompt_keeps_the_cycle() {
        let mut previous = Registrations::default();
        previous.register(10);
        let harness = harness_with(CycleConfig::default(), previous.clone());
        harness
            .run_command(command("start-cycle", ADMIN, &["Admin"]))
            .await;
        harness.click_last_sent(0, ADMIN).await;

        let response = harness.click_last_sent(1, ADMIN).await;

        assert_eq!(response, InteractionResponse::ephemeral(CANCELLED));
        assert!(harness.windows.window.lock().unwrap().is_none());
        assert_eq!(harness.registrations.current(), previous);
        assert_eq!(
            harness.guild.sent_contents(),
            vec![START_PROMPT, CONFIRM_AGAIN_PROMPT]
        );
        assert!(
            harness
                .workflow
                .prompts
                .lock()
                .await
                .confirmations
                .is_empty()
        );
    }

    #[tokio::test]
    async fn second_prompt_refuses_other_users() {
        let mut previous = Registrations::default();
        previous.register(10);
        let harness = harness_with(CycleConfig::default(), previous.clone());
        harness
            .run_command(command("start-cycle", ADMIN, &["Admin"]))
            .await;
        harness.click_last_sent(0, ADMIN).await;

        for choice in [0, 1] {
            let response = harness.click_last_sent(choice, 2).await;
            assert_eq!(response, InteractionResponse::ephemeral(NOT_FOR_YOU));
        }

        assert!(harness.windows.window.lock().unwrap().is_none());
        assert_eq!(harness.registrations.current(), previous);
        assert_eq!(harness.guild.sent.lock().unwrap().len(), 2);

        let response = harness.click_last_sent(0, ADMIN).await;
        assert_eq!(response, InteractionResponse::ephemeral(RESETTING));
    }

    #[tokio::test]
    async fn stale_confirmation_is_treated_as_expired() {
        let harness = harness();
        harness
            .run_command(command("start-cycle", ADMIN, &["Admin"]))
            .await;
        harness.click_last_sent(0, ADMIN).await;
        harness.clock.advance(TimeDelta::seconds(31));

        let response = harness.click_last_sent(0, ADMIN).await;

        assert_eq!(response, InteractionResponse::ephemeral(CONFIRMATION_EXPIRED));
        assert!(harness.windows.window.lock().unwrap().is_none());
        assert_eq!(harness.guild.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unanswered_confirmation_is_reaped() {
        let cycle = CycleConfig {
            first_confirm_timeout: Duration::from_millis(20),
            ..CycleConfig::default()
        };
        let harness = harness_with(cycle, Registrations::default());
        harness
            .run_command(command("start-cycle", ADMIN, &["Admin"]))
            .await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(
            harness
                .workflow
                .prompts
                .lock()
                .await
                .confirmations
                .is_empty()
        );
        assert!(harness.guild.deleted.lock().unwrap().contains(&MessageRef {
            channel_id: CHANNEL,
            message_id: 5001
        }));
    }

    #[tokio::test]
    async fn register_is_rejected_without_an_open_window() {
        let harness = harness();
        assert_eq!(
            harness.register(3).await,
            InteractionResponse::ephemeral(PERIOD_OVER)
        );
        assert!(harness.registrations.current().is_empty());

        let harness = open_harness();
        harness.clock.advance(TimeDelta::days(4));
        assert_eq!(
            harness.register(3).await,
            InteractionResponse::ephemeral(PERIOD_OVER)
        );
        assert_eq!(*harness.registrations.saves.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn register_then_pick_language() {
        let harness = open_harness();

        let prompt = harness.register(3).await;
        assert_eq!(content(&prompt), LANGUAGE_PROMPT);
        assert_eq!(buttons(&prompt).len(), 3);
        assert!(matches!(&prompt, InteractionResponse::Message(message) if message.ephemeral));
        assert!(harness.registrations.current().is_registered(3));

        let response = harness.pick(&prompt, Language::En, 3).await;
        assert_eq!(response, InteractionResponse::ephemeral("REGISTERED!!"));
        assert_eq!(
            harness.registrations.current().language_of(3),
            Some(Language::En)
        );
        assert!(harness.guild.deleted.lock().unwrap().contains(&MessageRef {
            channel_id: CHANNEL,
            message_id: 9100
        }));

        let response = harness.pick(&prompt, Language::Zh, 3).await;
        assert_eq!(response, InteractionResponse::ephemeral(ALREADY_CHOSEN));

        let response = harness.register(3).await;
        assert_eq!(response, InteractionResponse::ephemeral(ALREADY_REGISTERED));
        assert_eq!(
            harness.registrations.current().language_of(3),
            Some(Language::En)
        );
    }

    #[tokio::test]
    async fn replaced_prompt_cannot_overwrite_language() {
        let harness = open_harness();

        let first = harness.register(3).await;
        let second = harness.register(3).await;
        assert_eq!(harness.registrations.current().len(), 1);

        harness.pick(&second, Language::Both, 3).await;
        let response = harness.pick(&first, Language::Zh, 3).await;

        assert_eq!(response, InteractionResponse::ephemeral(ALREADY_CHOSEN));
        assert_eq!(
            harness.registrations.current().language_of(3),
            Some(Language::Both)
        );
    }

    #[tokio::test]
    async fn language_sessions_do_not_pile_up() {
        let harness = open_harness();

        let mut prompt = harness.register(5).await;
        for _ in 0..50 {
            prompt = harness.register(5).await;
        }
        harness.register(6).await;
        assert_eq!(
            harness.workflow.prompts.lock().await.language_prompts.len(),
            2
        );

        harness.pick(&prompt, Language::En, 5).await;

        let prompts = harness.workflow.prompts.lock().await;
        assert_eq!(prompts.language_prompts.len(), 1);
        assert!(
            prompts
                .language_prompts
                .values()
                .all(|session| session.owner == 6)
        );
    }

    #[tokio::test]
    async fn unregistered_pick_can_be_retried() {
        let harness = open_harness();
        let prompt = harness.register(3).await;
        *harness.registrations.record.lock().unwrap() = Registrations::default();

        let first = harness.pick(&prompt, Language::Zh, 3).await;
        let second = harness.pick(&prompt, Language::Zh, 3).await;

        assert_eq!(first, InteractionResponse::ephemeral(REGISTER_FIRST));
        assert_eq!(second, InteractionResponse::ephemeral(REGISTER_FIRST));
        assert!(harness.registrations.current().is_empty());
    }

    #[tokio::test]
    async fn pick_after_deadline_is_rejected() {
        let harness = open_harness();
        let prompt = harness.register(3).await;
        harness.clock.advance(TimeDelta::days(4));

        let response = harness.pick(&prompt, Language::Zh, 3).await;

        assert_eq!(response, InteractionResponse::ephemeral(PERIOD_OVER));
        assert_eq!(harness.registrations.current().language_of(3), None);
    }

    #[tokio::test]
    async fn pick_on_unknown_prompt_asks_to_register_again() {
        let harness = open_harness();
        let interaction = press(
            &language_button_id(Uuid::new_v4(), Language::Zh),
            3,
            9100,
        );
        assert_eq!(
            harness.click(interaction).await,
            InteractionResponse::ephemeral(LANGUAGE_PROMPT_EXPIRED)
        );
        assert!(harness.registrations.current().is_empty());
    }

    #[tokio::test]
    async fn failed_save_releases_the_pick() {
        let harness = open_harness();
        let prompt = harness.register(3).await;
        *harness.registrations.fail_saves.lock().unwrap() = true;

        let interaction = press(&buttons(&prompt)[0].custom_id, 3, 9100);
        let event = WorkflowEvent::parse(&interaction.custom_id).unwrap();
        assert!(
            harness
                .workflow
                .handle_interaction(event, &interaction)
                .await
                .is_err()
        );

        *harness.registrations.fail_saves.lock().unwrap() = false;
        let response = harness.pick(&prompt, Language::Zh, 3).await;
        assert_eq!(response, InteractionResponse::ephemeral("已註冊!!"));
    }

    #[tokio::test]
    async fn display_roles_counts_languages() {
        let harness = open_harness();
        for (user_id, language) in [(1, Language::Zh), (2, Language::Zh), (3, Language::Both)] {
            let prompt = harness.register(user_id).await;
            harness.pick(&prompt, language, user_id).await;
        }
        harness.register(4).await;

        let response = harness.run_command(command("display-roles", 9, &[])).await;

        assert_eq!(
            response,
            InteractionResponse::public(
                "Registration Summary\nTotal Users: 4\nZH Users: 2\nEN Users: 0\nBoth Users: 1"
            )
        );
    }

    #[tokio::test]
    async fn assign_teams_grants_roles_and_posts_summary() {
        let harness = open_harness();
        for (user_id, language) in [(1, Language::Zh), (2, Language::En), (3, Language::Both)] {
            harness.guild.add_member(user_id, &[]);
            let prompt = harness.register(user_id).await;
            harness.pick(&prompt, language, user_id).await;
        }

        let refused = harness.run_command(command("assign-teams", 9, &[])).await;
        assert!(harness.guild.granted.lock().unwrap().is_empty());
        assert!(content(&refused).contains("Admin"));

        let response = harness
            .run_command(command("assign-teams", ADMIN, &["Admin"]))
            .await;

        assert!(content(&response).contains("Team A: 1 members"));
        assert!(content(&response).contains("Team G: 2 members"));
        assert!(content(&response).contains("Team H: 0 members"));
        assert_eq!(harness.guild.member_role_names(1), vec!["A".to_string()]);
        assert_eq!(harness.guild.member_role_names(2), vec!["G".to_string()]);
        assert_eq!(harness.guild.member_role_names(3), vec!["G".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_presses_keep_every_registration() {
        let harness = open_harness();
        let mut tasks = Vec::new();
        for user_id in 100..130_u64 {
            let workflow = harness.workflow.clone();
            tasks.push(tokio::spawn(async move {
                let interaction = press(REGISTER_BUTTON_ID, user_id, 9000);
                workflow
                    .handle_interaction(WorkflowEvent::UserRegister, &interaction)
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(harness.registrations.current().len(), 30);
    }
}
