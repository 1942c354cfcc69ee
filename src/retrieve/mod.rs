// SPDX-License-Identifier: MIT

//! Retrieve abstraction.
//!
//! A [`RetrieveClient`] starts a retrieve and hands back a
//! [`RetrieveOperation`]: a handle whose completion is awaited with
//! [`RetrieveOperation::wait`] and which can be cancelled from another task
//! through a [`CancelHandle`]. Cancellation is cooperative; the in-flight
//! work observes the signal and winds down.

pub mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::props::FileProperties;
use crate::component::Component;

#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    pub username: String,
    /// `Type:FullName` member selectors.
    pub members: Vec<String>,
    pub output_dir: PathBuf,
    pub api_version: String,
}

/// What a finished retrieve produced: the server's per-component property
/// index plus the components resolved out of the output directory.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOutcome {
    pub success: bool,
    pub file_properties: Vec<FileProperties>,
    pub components: Vec<Component>,
}

#[async_trait]
pub trait RetrieveClient: Send + Sync {
    async fn retrieve(&self, request: &RetrieveRequest) -> Result<RetrieveOperation>;
}

/// Clonable cancellation trigger for an in-flight retrieve.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct RetrieveOperation {
    task: JoinHandle<Result<RetrieveOutcome>>,
    cancel: Arc<watch::Sender<bool>>,
}

impl RetrieveOperation {
    pub fn new(
        task: JoinHandle<Result<RetrieveOutcome>>,
        cancel: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self { task, cancel }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    /// Await completion. The operation's own failure is propagated as-is.
    pub async fn wait(self) -> Result<RetrieveOutcome> {
        self.task.await.context("retrieve task panicked")?
    }
}
