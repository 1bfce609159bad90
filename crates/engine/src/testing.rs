//! Test doubles for tools, probes, and actions.
//!
//! Used by the engine's own tests and by downstream crates that want to exercise plans without a
//! cluster.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use async_trait::async_trait;
use stagehand_types::{ReadinessState, ResourceRef};

use crate::{
    actions::Action,
    context::RunContext,
    lease::Lease,
    probe::{Probe, ProbeError},
    tools::{Invocation, ToolError, ToolOutput, ToolRunner},
};

#[derive(Debug, Clone)]
enum Scripted {
    Output(ToolOutput),
    TimedOut,
}

/// Tool runner that answers from a script keyed by the full command line.
///
/// Each command holds a queue of answers; the last answer repeats once the queue is down to one.
/// Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedTools {
    answers: Mutex<HashMap<String, VecDeque<Scripted>>>,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    stdin: Mutex<Vec<(String, String)>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: &str, answer: Scripted) {
        let mut answers = self.answers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        answers.entry(command.to_string()).or_default().push_back(answer);
    }

    pub fn succeed(&self, command: &str, stdout: &str) {
        self.push(command, Scripted::Output(ToolOutput::ok(stdout)));
    }

    pub fn fail(&self, command: &str, status: i32, stderr: &str) {
        self.push(command, Scripted::Output(ToolOutput::failed(status, stderr)));
    }

    pub fn time_out(&self, command: &str) {
        self.push(command, Scripted::TimedOut);
    }

    /// Every invocation of `tool` fails as if the binary were missing.
    pub fn not_installed(&self, tool: &str) {
        self.missing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(tool.to_string());
    }

    /// Command lines seen so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }

    /// Stdin payloads keyed by command line.
    pub fn stdin_for(&self, command: &str) -> Option<String> {
        self.stdin
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .find(|(seen, _)| seen == command)
            .map(|(_, payload)| payload.clone())
    }

    /// Background processes released so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn record(&self, invocation: &Invocation) -> Result<String, ToolError> {
        let command = invocation.to_string();
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.clone());
        if let Some(payload) = &invocation.stdin {
            self.stdin
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((command.clone(), payload.clone()));
        }
        let missing = self.missing.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if missing.contains(&invocation.tool) {
            return Err(ToolError::NotInstalled {
                tool: invocation.tool.clone(),
            });
        }
        Ok(command)
    }
}

#[async_trait]
impl ToolRunner for ScriptedTools {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let command = self.record(invocation)?;
        let answer = {
            let mut answers = self.answers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match answers.get_mut(&command) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match answer {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::TimedOut) => Err(ToolError::TimedOut {
                command,
                after: invocation.timeout.unwrap_or(Duration::from_secs(1)),
            }),
            None => Ok(ToolOutput::ok("")),
        }
    }

    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn Lease>, ToolError> {
        let command = self.record(invocation)?;
        Ok(Box::new(RecordedLease {
            label: command,
            released: self.released.clone(),
        }))
    }
}

struct RecordedLease {
    label: String,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl Lease for RecordedLease {
    fn label(&self) -> &str {
        &self.label
    }

    async fn release(self: Box<Self>) -> anyhow::Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Probe that replays a fixed sequence of answers; the last one repeats.
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<Result<ReadinessState, ProbeError>>>,
    calls: AtomicU32,
    delay: Duration,
}

impl ScriptedProbe {
    pub fn new(answers: impl IntoIterator<Item = Result<ReadinessState, ProbeError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        })
    }

    pub fn states(states: impl IntoIterator<Item = ReadinessState>) -> Arc<Self> {
        Self::new(states.into_iter().map(Ok))
    }

    pub fn always(state: ReadinessState) -> Arc<Self> {
        Self::states([state])
    }

    /// Probe that takes `delay` before answering `state`.
    pub fn slow(state: ReadinessState, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(VecDeque::from([Ok(state)])),
            calls: AtomicU32::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn check(&self, _resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut answers = self.answers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().cloned()
        };
        answer.unwrap_or(Ok(ReadinessState::Absent))
    }
}

/// Action that counts invocations and optionally fails.
pub struct SpyAction {
    label: String,
    failure: Option<String>,
    invocations: AtomicU32,
}

impl SpyAction {
    pub fn succeeding(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            failure: None,
            invocations: AtomicU32::new(0),
        })
    }

    pub fn failing(label: impl Into<String>, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            failure: Some(message.into()),
            invocations: AtomicU32::new(0),
        })
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for SpyAction {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn execute(&self, _context: &RunContext) -> anyhow::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(())
    }
}
