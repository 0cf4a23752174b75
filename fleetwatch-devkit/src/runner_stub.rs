/*!
Scripted command runner

Understands the harness command templates (`probe <address>`,
`power-reset <address>`, `power-on <address>`): the verb is the first word, the
target the last. Each target answers with its scripted outcome; unscripted
targets succeed. A target can also be stalled once, to make a sweep overrun
its period, or scripted to panic, to check that a sweep survives it.
*/

use async_trait::async_trait;
use fleetwatch_kernel::execution::{CommandRunner, RunError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Fail,
    Timeout,
    Panic,
}

pub struct ScriptedRunner {
    probes: Mutex<HashMap<String, Outcome>>,
    power: Mutex<HashMap<String, Outcome>>,
    stalls: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
    timeline: Timeline,
}

impl ScriptedRunner {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            probes: Mutex::new(HashMap::new()),
            power: Mutex::new(HashMap::new()),
            stalls: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            timeline,
        }
    }

    pub fn set_probe(&self, address: &str, outcome: Outcome) {
        self.probes.lock().insert(address.to_string(), outcome);
    }

    pub fn set_power(&self, power_address: &str, outcome: Outcome) {
        self.power.lock().insert(power_address.to_string(), outcome);
    }

    /// The next command aimed at `target` sleeps `delay` before answering.
    pub fn stall_next(&self, target: &str, delay: Duration) {
        self.stalls.lock().insert(target.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of commands run whose verb is `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command_line: &str, timeout: Duration) -> Result<String, RunError> {
        self.calls.lock().push(command_line.to_string());
        self.timeline.push(format!("run {}", command_line));

        let mut words = command_line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let target = words.last().unwrap_or_default();
        let outcome = match verb {
            "probe" => self.probes.lock().get(target).copied().unwrap_or(Outcome::Ok),
            "power-reset" | "power-on" => self.power.lock().get(target).copied().unwrap_or(Outcome::Ok),
            other => return Err(RunError::NotConfigured(format!("unscripted command {other}"))),
        };

        let stall = self.stalls.lock().remove(target);
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            Outcome::Ok => Ok(String::new()),
            Outcome::Fail => Err(RunError::Exit {
                code: Some(1),
                output: format!("{verb} {target} failed"),
            }),
            Outcome::Timeout => Err(RunError::Timeout(timeout)),
            Outcome::Panic => panic!("scripted panic: {verb} {target}"),
        }
    }
}
