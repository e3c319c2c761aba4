//! SDK error-code injection for the simulated devices.
//!
//! Operations are named after the SDK call they simulate (`"Initialize"`,
//! `"SetImage"`, `"ShamrockSetGrating"`, ...). A matching scenario makes the
//! call return the scenario's vendor code instead of succeeding.

use super::rng::MockRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One injected failure rule.
#[derive(Debug, Clone)]
pub enum FaultScenario {
    /// Every call of `operation` fails.
    Always {
        operation: &'static str,
        code: i32,
    },
    /// The first call of `operation` fails, later calls succeed.
    Once {
        operation: &'static str,
        code: i32,
    },
    /// Calls after the first `count` successful ones fail.
    FailAfterN {
        operation: &'static str,
        count: u32,
        code: i32,
    },
}

impl FaultScenario {
    fn operation(&self) -> &'static str {
        match self {
            FaultScenario::Always { operation, .. }
            | FaultScenario::Once { operation, .. }
            | FaultScenario::FailAfterN { operation, .. } => operation,
        }
    }
}

#[derive(Default, Debug)]
struct FaultState {
    scenarios: Vec<FaultScenario>,
    operation_counts: HashMap<&'static str, u32>,
    fired_once: Vec<usize>,
    random_rate: f64,
    random_code: i32,
}

/// Shared, mutable set of fault scenarios.
///
/// Clones share state, so a test can keep one clone and arm faults on a
/// device that is already owned by a session.
#[derive(Clone, Debug)]
pub struct FaultPlan {
    state: Arc<Mutex<FaultState>>,
    rng: Arc<MockRng>,
}

impl FaultPlan {
    /// No faults.
    pub fn none() -> Self {
        Self::seeded(None)
    }

    /// No faults, with a fixed RNG seed for random failures.
    pub fn seeded(seed: Option<u64>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FaultState::default())),
            rng: Arc::new(MockRng::new(seed)),
        }
    }

    /// Add a scenario.
    pub fn inject(&self, scenario: FaultScenario) {
        self.state.lock().scenarios.push(scenario);
    }

    /// Fail any operation at `rate` with `code`.
    pub fn random_failures(&self, rate: f64, code: i32) {
        let mut state = self.state.lock();
        state.random_rate = rate;
        state.random_code = code;
    }

    /// Remove every scenario and counter.
    pub fn clear(&self) {
        *self.state.lock() = FaultState::default();
    }

    /// Vendor code to return for this call, if it should fail.
    pub fn check(&self, operation: &'static str) -> Result<(), i32> {
        let mut state = self.state.lock();
        let count = {
            let entry = state.operation_counts.entry(operation).or_insert(0);
            *entry += 1;
            *entry
        };

        let mut failure = None;
        for (index, scenario) in state.scenarios.iter().enumerate() {
            if scenario.operation() != operation {
                continue;
            }
            match scenario {
                FaultScenario::Always { code, .. } => {
                    failure = Some((None, *code));
                }
                FaultScenario::Once { code, .. } if !state.fired_once.contains(&index) => {
                    failure = Some((Some(index), *code));
                }
                FaultScenario::FailAfterN { count: n, code, .. } if count > *n => {
                    failure = Some((None, *code));
                }
                _ => {}
            }
            if failure.is_some() {
                break;
            }
        }

        if let Some((once_index, code)) = failure {
            if let Some(index) = once_index {
                state.fired_once.push(index);
            }
            tracing::debug!(operation, code, "injected device fault");
            return Err(code);
        }

        if self.rng.should_fail(state.random_rate) {
            return Err(state.random_code);
        }
        Ok(())
    }
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::none()
    }
}
