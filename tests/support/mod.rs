#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use agno_chat::agents::StaticAgentDirectory;
use agno_chat::app::{ChatApp, HostOps, RunId, RunStart};
pub use agno_chat::runtime::lock_unpoisoned;
use session_store::{MemoryStorage, SessionRegistry};

/// Host double that records every call the app makes.
pub struct HostSpy {
    pub next_run_id: RunId,
    pub started: Vec<RunStart>,
    pub cancelled: Vec<RunId>,
    pub renders: usize,
    pub refuse_with: Option<String>,
}

impl HostSpy {
    pub fn new(first_run_id: RunId) -> Self {
        Self {
            next_run_id: first_run_id,
            started: Vec::new(),
            cancelled: Vec::new(),
            renders: 0,
            refuse_with: None,
        }
    }

    pub fn last_run_id(&self) -> RunId {
        self.next_run_id - 1
    }

    pub fn last_start(&self) -> &RunStart {
        self.started.last().expect("a run should have been started")
    }
}

impl HostOps for HostSpy {
    fn start_run(&mut self, start: RunStart) -> Result<RunId, String> {
        if let Some(error) = &self.refuse_with {
            return Err(error.clone());
        }
        self.started.push(start);
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        Ok(run_id)
    }

    fn cancel_run(&mut self, run_id: RunId) {
        self.cancelled.push(run_id);
    }

    fn request_render(&mut self) {
        self.renders += 1;
    }
}

pub fn app_with_storage(storage: &MemoryStorage) -> ChatApp {
    let registry = SessionRegistry::load(Box::new(storage.clone()));
    ChatApp::new(registry, Box::new(StaticAgentDirectory::builtin()), None)
        .expect("builtin agents are available")
}

pub fn app() -> ChatApp {
    app_with_storage(&MemoryStorage::new())
}

pub fn texts(app: &ChatApp) -> Vec<String> {
    app.current_messages()
        .map(|log| log.iter().map(|message| message.text.clone()).collect())
        .unwrap_or_default()
}

pub fn shared(app: ChatApp) -> Arc<Mutex<ChatApp>> {
    Arc::new(Mutex::new(app))
}
