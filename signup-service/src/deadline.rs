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

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use signup_common::RegistrationWindow;
use tracing::info;

use crate::store::{read_json, write_json};

#[async_trait]
pub trait WindowStore: Send + Sync {
    /// `None` when no window was ever opened or the record is malformed.
    async fn load(&self) -> Option<RegistrationWindow>;
    async fn save(&self, window: &RegistrationWindow) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonFileWindowStore {
    path: PathBuf,
}

impl JsonFileWindowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WindowStore for JsonFileWindowStore {
    async fn load(&self) -> Option<RegistrationWindow> {
        read_json(&self.path).await
    }

    async fn save(&self, window: &RegistrationWindow) -> anyhow::Result<()> {
        write_json(&self.path, window).await
    }
}

/// Opens registration windows and answers whether one is open.
pub struct DeadlineManager {
    store: Arc<dyn WindowStore>,
    utc_offset: FixedOffset,
    days_ahead: u64,
    deadline_hour: u32,
}

impl DeadlineManager {
    pub fn new(
        store: Arc<dyn WindowStore>,
        utc_offset: FixedOffset,
        days_ahead: u64,
        deadline_hour: u32,
    ) -> Self {
        Self {
            store,
            utc_offset,
            days_ahead,
            deadline_hour,
        }
    }

    /// Persist a new window starting at `now`, replacing any previous one.
    pub async fn start_cycle(&self, now: DateTime<Utc>) -> anyhow::Result<RegistrationWindow> {
        let local_now = now.with_timezone(&self.utc_offset);
        let window = RegistrationWindow::opening_at(local_now, self.days_ahead, self.deadline_hour)
            .with_context(|| {
                format!(
                    "cannot compute a deadline {} days after {local_now} at {}:00",
                    self.days_ahead, self.deadline_hour
                )
            })?;
        self.store
            .save(&window)
            .await
            .context("failed to persist registration window")?;
        info!(
            start_time = %window.start_time,
            deadline = %window.deadline,
            "registration window opened"
        );
        Ok(window)
    }

    pub async fn current_deadline(&self) -> Option<DateTime<FixedOffset>> {
        self.store.load().await.map(|window| window.deadline)
    }

    pub async fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.store
            .load()
            .await
            .is_some_and(|window| window.is_open_at(&now))
    }
}
