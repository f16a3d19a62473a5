/// Tunables for the adherence state machine. Defaults mirror the values
/// named in the configuration surface.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub snooze_minutes: u32,
    pub max_snoozes: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            snooze_minutes: 15,
            max_snoozes: 3,
        }
    }
}
