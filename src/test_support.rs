use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::capability::Session;
use crate::clock::ManualClock;
use crate::config::Config;
use crate::engine::LeadEngine;
use crate::models::{Lead, NewLead, Program, Role, StaffUser};
use crate::notify::RecordingNotifier;
use crate::store::Store;
use crate::sync::{MemoryRemote, SyncQueue};

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub(crate) struct Harness {
    pub engine: LeadEngine,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = ManualClock::new(start());
        let notifier = RecordingNotifier::default();
        let mut store = Store::in_memory();
        for (id, name) in [("guitar", "Jazz Guitar"), ("piano", "Piano"), ("voice", "Voice")] {
            store.upsert_program(Program {
                id: id.to_string(),
                name: name.to_string(),
                active: true,
            });
        }
        let engine = LeadEngine::new(store, config)
            .with_clock(Arc::new(clock.clone()))
            .with_notifier(Arc::new(notifier.clone()));
        Self {
            engine,
            clock,
            notifier,
        }
    }

    pub fn add_staff(&mut self, name: &str, role: Role) -> StaffUser {
        let user = StaffUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            role,
            active: true,
            metrics: None,
            created_at: start(),
        };
        self.engine.store.insert_staff(user.clone());
        user
    }

    pub fn create(&mut self, name: &str, email: Option<&str>) -> Lead {
        self.engine
            .create_lead(
                &Session::system(),
                NewLead {
                    name: name.to_string(),
                    email: email.map(str::to_string),
                    program_id: Some("guitar".to_string()),
                    ..NewLead::default()
                },
            )
            .unwrap()
            .lead
    }

    /// Replicates every later write to `remote`. Needs a tokio runtime.
    pub fn replicate_to(&mut self, remote: MemoryRemote) {
        let placeholder = LeadEngine::new(Store::in_memory(), Config::default());
        let engine = std::mem::replace(&mut self.engine, placeholder);
        self.engine = engine.with_sync(SyncQueue::spawn(remote, 64));
    }

    pub fn lead(&self, id: Uuid) -> Lead {
        self.engine.store().lead(id).unwrap().clone()
    }
}
