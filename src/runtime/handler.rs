use crate::runtime::condition::Condition;
use crate::runtime::variables::Variables;
use serde::{Serialize, Deserialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireMode {
    /// Evaluated once when the engine starts.
    Start,
    /// Evaluated on every tick until it fires.
    #[default]
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Idle,
    Evaluating,
    Fired,
    /// Will never fire again.
    Inert,
}

/// Decides when a node begins execution.
#[derive(Debug)]
pub enum EventHandler {
    GameStarted,
    Message(String),
    Conditional(ConditionalEventHandler),
}

impl EventHandler {
    pub fn fire_mode(&self) -> FireMode {
        match self {
            EventHandler::GameStarted => FireMode::Start,
            EventHandler::Message(_) => FireMode::Update,
            EventHandler::Conditional(h) => h.mode(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            EventHandler::GameStarted => "Game Started".to_string(),
            EventHandler::Message(name) => format!("Message Received: {}", name),
            EventHandler::Conditional(h) => h.summary(),
        }
    }
}

/// Fires its node once every condition holds.
#[derive(Debug)]
pub struct ConditionalEventHandler {
    mode: FireMode,
    conditions: Vec<Condition>,
    state: HandlerState,
}

impl ConditionalEventHandler {
    pub fn new(mode: FireMode, conditions: Vec<Condition>) -> Self {
        if conditions.is_empty() {
            warn!(?mode, "Conditional handler has no conditions and will always fire");
        }
        Self {
            mode,
            conditions,
            state: HandlerState::Idle,
        }
    }

    pub fn mode(&self) -> FireMode {
        self.mode
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn add_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn remove_condition(&mut self, index: usize) -> Option<Condition> {
        if index < self.conditions.len() {
            Some(self.conditions.remove(index))
        } else {
            None
        }
    }

    /// Runs one evaluation pass and returns whether the handler fired.
    ///
    /// Conditions are ANDed and short-circuit on the first false one. An empty
    /// list is true. A `Start` handler goes inert after its first pass either way.
    pub fn evaluate(&mut self, vars: &Variables) -> bool {
        if self.state != HandlerState::Idle {
            return false;
        }

        self.state = HandlerState::Evaluating;
        let passed = self.conditions.iter().all(|c| c.evaluate(vars));

        self.state = match (passed, self.mode) {
            (true, _) => HandlerState::Fired,
            (false, FireMode::Start) => HandlerState::Inert,
            (false, FireMode::Update) => HandlerState::Idle,
        };
        passed
    }

    /// Called by the engine after a firing has been handled.
    pub fn settle(&mut self, repeatable: bool) {
        if self.state != HandlerState::Fired {
            return;
        }
        self.state = if repeatable && self.mode == FireMode::Update {
            HandlerState::Idle
        } else {
            HandlerState::Inert
        };
    }

    /// Re-arms the handler, e.g. after loading a save.
    pub fn reset(&mut self) {
        self.state = HandlerState::Idle;
    }

    pub fn summary(&self) -> String {
        let mode = match self.mode {
            FireMode::Start => "on start",
            FireMode::Update => "on update",
        };
        if self.conditions.is_empty() {
            return format!("Conditional ({}): always", mode);
        }
        let parts: Vec<String> = self.conditions.iter().map(Condition::summary).collect();
        format!("Conditional ({}): {}", mode, parts.join(" and "))
    }
}
