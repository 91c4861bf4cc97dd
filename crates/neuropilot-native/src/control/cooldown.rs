//! Per-command cooldowns
//!
//! The table holds configured durations; the registry holds the
//! earliest-eligible timestamp of each command that has been emitted.

use std::collections::HashMap;

use neuropilot_core::types::ms_to_us;
use neuropilot_core::FlightCommand;
use serde::{Deserialize, Serialize};

/// Cooldown durations per command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownTable {
    /// Applied to commands without an entry (ms)
    pub default_ms: u64,
    /// Per-command durations (ms)
    pub per_command_ms: HashMap<FlightCommand, u64>,
}

impl Default for CooldownTable {
    fn default() -> Self {
        let per_command_ms = HashMap::from([
            (FlightCommand::ToggleFlight, 3_000),
            (FlightCommand::Takeoff, 3_000),
            (FlightCommand::Land, 2_000),
            (FlightCommand::Emergency, 1_000),
        ]);
        Self { default_ms: 500, per_command_ms }
    }
}

impl CooldownTable {
    /// Cooldown of `command` in microseconds
    #[must_use]
    pub fn duration_us(&self, command: FlightCommand) -> u64 {
        ms_to_us(self.per_command_ms.get(&command).copied().unwrap_or(self.default_ms))
    }
}

/// Earliest-eligible timestamp per command
#[derive(Clone, Debug, Default)]
pub struct CooldownRegistry {
    eligible_at_us: HashMap<FlightCommand, u64>,
}

impl CooldownRegistry {
    /// Time left before `command` may be emitted again
    #[must_use]
    pub fn remaining_us(&self, command: FlightCommand, now_us: u64) -> u64 {
        self.eligible_at_us
            .get(&command)
            .map_or(0, |&at| at.saturating_sub(now_us))
    }

    /// Record an emission of `command` at `now_us`
    pub fn record(&mut self, command: FlightCommand, now_us: u64, duration_us: u64) {
        self.eligible_at_us.insert(command, now_us.saturating_add(duration_us));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_defaults() {
        let table = CooldownTable::default();
        assert_eq!(table.duration_us(FlightCommand::ToggleFlight), 3_000_000);
        assert_eq!(table.duration_us(FlightCommand::Emergency), 1_000_000);
        assert_eq!(table.duration_us(FlightCommand::RotateLeft), 500_000);
    }

    #[test]
    fn test_registry() {
        let mut reg = CooldownRegistry::default();
        assert_eq!(reg.remaining_us(FlightCommand::Land, 0), 0);

        reg.record(FlightCommand::Land, 1_000_000, 2_000_000);
        assert_eq!(reg.remaining_us(FlightCommand::Land, 2_500_000), 500_000);
        assert_eq!(reg.remaining_us(FlightCommand::Land, 3_000_000), 0);
        // Independent per command
        assert_eq!(reg.remaining_us(FlightCommand::Takeoff, 2_500_000), 0);

        // Huge configured cooldowns saturate instead of wrapping
        reg.record(FlightCommand::Up, 1_000_000, u64::MAX);
        assert_eq!(reg.remaining_us(FlightCommand::Up, 2_000_000), u64::MAX - 2_000_000);
    }

    #[test]
    fn test_table_json_keys() {
        let table: CooldownTable =
            serde_json::from_str(r#"{"default_ms":250,"per_command_ms":{"rotate_left":1000}}"#).unwrap();
        assert_eq!(table.duration_us(FlightCommand::RotateLeft), 1_000_000);
        assert_eq!(table.duration_us(FlightCommand::Up), 250_000);
    }
}
