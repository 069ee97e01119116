//! The façade that owns a workout while it runs.
//!
//! [`ScriptRuntime`] holds the stack, memory, compiler and event bus.
//! Outside code drives it with [`ScriptRuntime::start`],
//! [`ScriptRuntime::next`], [`ScriptRuntime::tick`] and
//! [`ScriptRuntime::handle`]; everything else happens through actions.

mod executor;

use tracing::{error, info};
use wod::WodScript;

use crate::action::Action;
use crate::behavior::EXECUTION_RECORD;
use crate::block::{BlockType, KeySequence};
use crate::bootstrap::{IdlePhase, idle_block, root_block};
use crate::clock::Clock;
use crate::compiler::JitCompiler;
use crate::error::RuntimeError;
use crate::event::{EventBus, HandlerId, HandlerRegistration, NextHandler, RuntimeEvent, names};
use crate::memory::{Memory, Owner, SearchCriteria, TypedMemoryReference, Visibility};
use crate::stack::{BlockStack, RuntimeStack};
use crate::state::{ExecutionRecord, LifecycleState, RuntimeControls};

pub const RUNTIME_CONTROLS: &str = "runtime-controls";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on actions executed while handling one call. Exceeding it
    /// aborts the dispatch with [`RuntimeError::ActionLimit`].
    pub max_actions_per_dispatch: usize,
    /// Leave the ready block as soon as the runtime starts.
    pub auto_start: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_actions_per_dispatch: 10_000,
            auto_start: false,
        }
    }
}

#[derive(Debug)]
pub struct ScriptRuntime {
    script: WodScript,
    stack: RuntimeStack,
    memory: Memory,
    compiler: JitCompiler,
    events: EventBus,
    clock: Box<dyn Clock>,
    keys: KeySequence,
    config: RuntimeConfig,
    errors: Vec<RuntimeError>,
    controls: TypedMemoryReference<RuntimeControls>,
    lifecycle: LifecycleState,
    paused: bool,
    started: bool,
}

impl ScriptRuntime {
    pub fn new(script: WodScript, compiler: JitCompiler, clock: impl Clock + 'static) -> Self {
        let mut memory = Memory::new();
        let controls = memory.allocate(
            RUNTIME_CONTROLS,
            Owner::Runtime,
            RuntimeControls::for_state(LifecycleState::Idle),
            Visibility::Public,
        );
        let mut events = EventBus::new();
        events.register(HandlerRegistration::new(
            HandlerId::scoped(Owner::Runtime, names::NEXT),
            Owner::Runtime,
            names::NEXT,
            NextHandler,
        ));

        ScriptRuntime {
            script,
            stack: RuntimeStack::new(),
            memory,
            compiler,
            events,
            clock: Box::new(clock),
            keys: KeySequence::new(),
            config: RuntimeConfig::default(),
            errors: Vec::new(),
            controls,
            lifecycle: LifecycleState::Idle,
            paused: false,
            started: false,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Push the root block and the ready block. Calling it again does nothing.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        if self.started {
            return Ok(());
        }
        let root = root_block(self.keys.next(), &self.script)?;
        let ready = idle_block(self.keys.next(), IdlePhase::Ready)?;
        self.started = true;
        info!(statements = self.script.statements.len(), "workout loaded");
        self.run(vec![
            Action::PushBlock(Box::new(root)),
            Action::PushBlock(Box::new(ready)),
        ])?;
        if self.config.auto_start {
            self.dispatch(names::TIMER_START)?;
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<(), RuntimeError> {
        self.dispatch(names::NEXT)
    }

    pub fn tick(&mut self) -> Result<(), RuntimeError> {
        self.dispatch(names::TIMER_TICK)
    }

    /// Handle a data-less event stamped with the current time.
    pub fn dispatch(&mut self, name: &str) -> Result<(), RuntimeError> {
        let event = RuntimeEvent::new(name, self.clock.now());
        self.handle(event)
    }

    /// Run registered handlers, deliver the event to the stack and execute
    /// every resulting action.
    pub fn handle(&mut self, event: RuntimeEvent) -> Result<(), RuntimeError> {
        let result = self
            .collect_event_actions(&event)
            .and_then(|actions| self.process_actions(actions));
        self.refresh_controls();
        result
    }

    fn run(&mut self, actions: Vec<Action>) -> Result<(), RuntimeError> {
        let result = self.process_actions(actions);
        self.refresh_controls();
        result
    }

    /// Record an error without interrupting execution.
    pub fn record_error(&mut self, error: RuntimeError) {
        error!(%error, "runtime error");
        self.errors.push(error);
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    pub fn is_complete(&self) -> bool {
        self.started && self.stack.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn script(&self) -> &WodScript {
        &self.script
    }

    pub fn stack(&self) -> &RuntimeStack {
        &self.stack
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn compiler(&self) -> &JitCompiler {
        &self.compiler
    }

    pub fn errors(&self) -> &[RuntimeError] {
        &self.errors
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn controls(&self) -> RuntimeControls {
        self.memory
            .get(&self.controls)
            .unwrap_or_else(|| RuntimeControls::for_state(self.lifecycle))
    }

    /// Execution records in the order blocks were pushed.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.memory.search_values(
            &SearchCriteria::new()
                .owned_by(Owner::Runtime)
                .of_kind(EXECUTION_RECORD),
        )
    }

    fn current_lifecycle(&self) -> LifecycleState {
        match self.stack.current() {
            None if self.started => LifecycleState::Complete,
            None => LifecycleState::Idle,
            Some(top) if top.block_type() == BlockType::Idle => {
                if self.stack.depth() == 1 {
                    LifecycleState::Complete
                } else {
                    LifecycleState::Idle
                }
            }
            Some(_) if self.paused => LifecycleState::Paused,
            Some(_) => LifecycleState::Executing,
        }
    }

    fn refresh_controls(&mut self) {
        let state = self.current_lifecycle();
        if state == self.lifecycle {
            return;
        }
        info!(from = ?self.lifecycle, to = ?state, "lifecycle changed");
        self.lifecycle = state;
        if let Err(error) = self
            .memory
            .set(&self.controls, RuntimeControls::for_state(state))
        {
            self.record_error(error);
        }
    }
}
