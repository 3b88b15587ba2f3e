// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Read-only process identity

use std::path::{Path, PathBuf};

/// Identity of the running process
pub trait ProcessIdentity: Send + Sync {
    fn id(&self) -> u32;
    fn app_name(&self) -> String;
    fn full_path(&self) -> PathBuf;
}

/// Identity of the current OS process
#[derive(Debug, Clone)]
pub struct CurrentProcess {
    id: u32,
    path: PathBuf,
}

impl CurrentProcess {
    pub fn new() -> Self {
        let path = std::env::current_exe()
            .ok()
            .or_else(|| std::env::args_os().next().map(PathBuf::from))
            .unwrap_or_default();
        Self {
            id: std::process::id(),
            path,
        }
    }
}

impl Default for CurrentProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessIdentity for CurrentProcess {
    fn id(&self) -> u32 {
        self.id
    }

    fn app_name(&self) -> String {
        app_name_of(&self.path)
    }

    fn full_path(&self) -> PathBuf {
        self.path.clone()
    }
}

/// Fixed identity, for tests and embedding
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    id: u32,
    name: String,
    path: PathBuf,
}

impl StaticIdentity {
    pub fn new(id: u32, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
        }
    }
}

impl ProcessIdentity for StaticIdentity {
    fn id(&self) -> u32 {
        self.id
    }

    fn app_name(&self) -> String {
        self.name.clone()
    }

    fn full_path(&self) -> PathBuf {
        self.path.clone()
    }
}

fn app_name_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mcrouter".to_string())
}
