//! Course management backend: offerings, facilitator load, weekly activity
//! logs, the reminder scheduler and the notification pipeline.

use std::sync::Arc;

pub mod activity;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod registry;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod summary;

use activity::ActivityEngine;
use clock::Clock;
use notify::{JobQueue, Notifier};
use pagination::PageLimits;
use registry::CourseRegistry;
use store::Store;
use summary::SummaryService;

/// Services shared by the HTTP handlers and the background tasks.
#[derive(Clone)]
pub struct AppState {
    pub registry: CourseRegistry,
    pub activities: ActivityEngine,
    pub summary: SummaryService,
    pub notifier: Notifier,
    pub page_limits: PageLimits,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        page_limits: PageLimits,
    ) -> Self {
        let notifier = Notifier::new(store.clone(), queue, clock.clone());
        Self {
            registry: CourseRegistry::new(store.clone(), notifier.clone(), clock.clone()),
            activities: ActivityEngine::new(store.clone(), notifier.clone(), clock),
            summary: SummaryService::new(store),
            notifier,
            page_limits,
        }
    }
}
