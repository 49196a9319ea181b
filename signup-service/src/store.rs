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
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use signup_common::Registrations;
use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Durable home of the registration record.
///
/// `load` never fails: missing or unreadable storage reads as empty.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn load(&self) -> Registrations;
    async fn save(&self, registrations: &Registrations) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonFileRegistrationStore {
    path: PathBuf,
}

impl JsonFileRegistrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistrationStore for JsonFileRegistrationStore {
    async fn load(&self) -> Registrations {
        read_json(&self.path).await.unwrap_or_default()
    }

    async fn save(&self, registrations: &Registrations) -> anyhow::Result<()> {
        write_json(&self.path, registrations).await
    }

    async fn clear(&self) -> anyhow::Result<()> {
        write_json(&self.path, &Registrations::default()).await
    }
}

/// Read and decode a JSON record, logging and returning `None` when the file
/// is missing or cannot be decoded.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "record file not found; treating as empty");
            return None;
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to read record file");
            return None;
        }
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "record file is corrupt; treating as empty");
            None
        }
    }
}

pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let contents = serde_json::to_string_pretty(value).context("failed to encode record")?;
    write_atomic(path, contents.as_bytes()).await
}

/// Write through a sibling temp file and rename it over the target, so
/// readers see either the old or the new record and never a partial one.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("record path {} must name a file", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp.{}", Uuid::new_v4()));

    let written = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(error) = written {
        if let Err(cleanup_error) = tokio::fs::remove_file(&tmp_path).await
            && cleanup_error.kind() != ErrorKind::NotFound
        {
            warn!(path = %tmp_path.display(), error = %cleanup_error, "failed to remove temp record file");
        }
        return Err(error).with_context(|| format!("failed to write {}", path.display()));
    }

    Ok(())
}

/// Serializes every load-modify-save of the registration record behind one
/// lock so concurrent registrations cannot overwrite each other.
pub struct RegistrationLedger {
    store: Arc<dyn RegistrationStore>,
    lock: Mutex<()>,
}

impl RegistrationLedger {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> Registrations {
        let _guard = self.lock.lock().await;
        self.store.load().await
    }

    /// Apply `change` to the current record and save it if anything changed.
    pub async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Registrations) -> T,
    ) -> anyhow::Result<T> {
        let _guard = self.lock.lock().await;
        let before = self.store.load().await;
        let mut after = before.clone();
        let result = change(&mut after);
        if after != before {
            self.store.save(&after).await?;
        }
        Ok(result)
    }

    /// Hold the lock across a multi-step operation such as a cycle reset.
    pub async fn lock(&self) -> LedgerGuard<'_> {
        LedgerGuard {
            _guard: self.lock.lock().await,
            store: self.store.as_ref(),
        }
    }
}

pub struct LedgerGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a dyn RegistrationStore,
}

impl LedgerGuard<'_> {
    pub async fn load(&self) -> Registrations {
        self.store.load().await
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.store.clear().await
    }
}
