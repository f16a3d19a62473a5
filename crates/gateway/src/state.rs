use std::sync::Arc;

use kg_coaching::CoachingEngine;
use kg_coordinator::Coordinator;
use kg_habits::HabitStore;
use kg_medications::MedicationRegistry;
use kg_reminders::ReminderStore;

use crate::config::GatewayConfig;
use crate::tokens::AdminTokenStore;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub medications: Arc<MedicationRegistry>,
    pub reminders: Arc<ReminderStore>,
    pub habits: Arc<HabitStore>,
    pub coordinator: Arc<Coordinator>,
    pub coaching: Arc<CoachingEngine>,
    pub tokens: Arc<AdminTokenStore>,
    pub config: Arc<GatewayConfig>,
}
