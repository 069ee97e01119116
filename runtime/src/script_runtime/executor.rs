use tracing::{debug, error, info, trace, warn};
use wod::statement::CodeStatement;

use super::ScriptRuntime;
use crate::action::Action;
use crate::block::{BlockEnv, BlockKey, RuntimeBlock};
use crate::compiler::CompileContext;
use crate::error::RuntimeError;
use crate::event::{RuntimeEvent, names};
use crate::stack::{BlockStack, ScopedStack};

impl ScriptRuntime {
    /// Execute actions depth first: whatever an action produces runs before
    /// the siblings queued after it.
    pub(super) fn process_actions(&mut self, actions: Vec<Action>) -> Result<(), RuntimeError> {
        let mut work: Vec<Action> = actions.into_iter().rev().collect();
        let mut executed = 0usize;

        while let Some(action) = work.pop() {
            executed += 1;
            if executed > self.config.max_actions_per_dispatch {
                let err = RuntimeError::ActionLimit(self.config.max_actions_per_dispatch);
                error!(%err, pending = work.len(), "dispatch aborted");
                self.errors.push(err.clone());
                return Err(err);
            }

            let name = action.name();
            trace!(action = name, "execute");
            match self.execute(action) {
                Ok(produced) => work.extend(produced.into_iter().rev()),
                Err(err) => self.fail(name, err)?,
            }
        }
        Ok(())
    }

    /// Configuration errors propagate. Anything else is recorded and the
    /// dispatch carries on with the next action.
    fn fail(&mut self, step: &'static str, err: RuntimeError) -> Result<(), RuntimeError> {
        if err.is_configuration() {
            error!(step, %err, "configuration error");
            return Err(err);
        }
        warn!(step, %err, "step failed");
        self.errors.push(RuntimeError::Action {
            action: step,
            message: err.to_string(),
        });
        Ok(())
    }

    fn execute(&mut self, action: Action) -> Result<Vec<Action>, RuntimeError> {
        match action {
            Action::PushBlock(block) => self.push_block(*block),
            Action::PopBlock { key } => self.pop_block(key),
            Action::UnwindTo { key } => {
                match self.stack.position(key) {
                    Some(position) => self.unwind_above(position),
                    None => debug!(block = %key, "unwind target not on stack"),
                }
                Ok(Vec::new())
            }
            Action::NextBlock => self.next_block(),
            Action::CompileChildren {
                parent,
                statement_ids,
            } => self.compile_children(parent, &statement_ids),
            Action::EmitEvent(event) => self.collect_event_actions(&event),
            Action::RegisterHandler(registration) => {
                self.events.register(registration);
                Ok(Vec::new())
            }
            Action::UnregisterHandler(id) => {
                if !self.events.unregister(&id) {
                    debug!(handler = %id, "handler already gone");
                }
                Ok(Vec::new())
            }
            Action::EndWorkout => self.end_workout(),
        }
    }

    // -----------------------------------------------------------------------
    // Stack operations
    // -----------------------------------------------------------------------

    fn push_block(&mut self, mut block: RuntimeBlock) -> Result<Vec<Action>, RuntimeError> {
        let ancestors = self.stack.keys();
        let mut env = BlockEnv {
            memory: &mut self.memory,
            script: &self.script,
            keys: &self.keys,
            ancestors: &ancestors,
            now: self.clock.now(),
            paused: self.paused,
        };
        match block.mount(&mut env) {
            Ok(actions) => {
                info!(
                    block = %block.key(),
                    label = block.label(),
                    kind = %block.block_type(),
                    depth = self.stack.depth() + 1,
                    "push"
                );
                self.stack.push(block);
                Ok(actions)
            }
            Err(err) => {
                block.dispose(&mut self.memory);
                Err(err)
            }
        }
    }

    /// Pop `key`, unwinding anything above it first. A block that is no
    /// longer on the stack is skipped, which makes repeated completion
    /// requests harmless.
    fn pop_block(&mut self, key: BlockKey) -> Result<Vec<Action>, RuntimeError> {
        let Some(position) = self.stack.position(key) else {
            debug!(block = %key, "pop skipped: not on stack");
            return Ok(Vec::new());
        };
        self.unwind_above(position);

        let unmounted = self.unmount_current();
        let popped = ScopedStack::new(&mut self.stack, &mut self.memory, &mut self.events).pop();
        let mut actions = unmounted?;

        if let Some(block) = popped {
            info!(block = %block.key(), label = block.label(), depth = self.stack.depth(), "pop");
            if block.resumes_parent() && !self.stack.is_empty() {
                actions.push(Action::NextBlock);
            }
        }
        Ok(actions)
    }

    /// Pop every block above `position` without running what their pop
    /// hooks ask for.
    fn unwind_above(&mut self, position: usize) {
        while self.stack.depth() > position + 1 {
            match self.unmount_current() {
                Ok(dropped) if !dropped.is_empty() => {
                    debug!(dropped = dropped.len(), "unwound block: pop actions dropped")
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "unmount failed during unwind");
                    self.errors.push(err);
                }
            }
            if let Some(block) = ScopedStack::new(&mut self.stack, &mut self.memory, &mut self.events).pop() {
                info!(block = %block.key(), label = block.label(), "unwound");
            }
        }
    }

    fn unmount_current(&mut self) -> Result<Vec<Action>, RuntimeError> {
        let ancestors: Vec<BlockKey> = self.stack.keys().into_iter().skip(1).collect();
        let now = self.clock.now();
        let Some(block) = self.stack.current_mut() else {
            return Ok(Vec::new());
        };
        let mut env = BlockEnv {
            memory: &mut self.memory,
            script: &self.script,
            keys: &self.keys,
            ancestors: &ancestors,
            now,
            paused: self.paused,
        };
        block.unmount(&mut env)
    }

    fn next_block(&mut self) -> Result<Vec<Action>, RuntimeError> {
        let ancestors: Vec<BlockKey> = self.stack.keys().into_iter().skip(1).collect();
        let now = self.clock.now();
        let Some(block) = self.stack.current_mut() else {
            return Ok(Vec::new());
        };
        let mut env = BlockEnv {
            memory: &mut self.memory,
            script: &self.script,
            keys: &self.keys,
            ancestors: &ancestors,
            now,
            paused: self.paused,
        };
        block.next(&mut env)
    }

    fn end_workout(&mut self) -> Result<Vec<Action>, RuntimeError> {
        let Some(bottom) = self.stack.get(0).map(RuntimeBlock::key) else {
            return Ok(Vec::new());
        };
        info!(depth = self.stack.depth(), "ending workout");
        self.pop_block(bottom)
    }

    // -----------------------------------------------------------------------
    // Compilation
    // -----------------------------------------------------------------------

    fn compile_children(
        &mut self,
        parent: BlockKey,
        statement_ids: &[usize],
    ) -> Result<Vec<Action>, RuntimeError> {
        if self.stack.current().map(RuntimeBlock::key) != Some(parent) {
            debug!(block = %parent, "compile skipped: parent is not current");
            return Ok(Vec::new());
        }
        let statements = statement_ids
            .iter()
            .map(|&id| {
                self.script
                    .get(id)
                    .cloned()
                    .ok_or(RuntimeError::UnknownStatement(id))
            })
            .collect::<Result<Vec<CodeStatement>, _>>()?;

        let stack = self.stack.keys();
        let ctx = CompileContext {
            memory: &self.memory,
            script: &self.script,
            keys: &self.keys,
            stack: &stack,
            now: self.clock.now(),
        };
        match self.compiler.compile(&statements, &ctx)? {
            Some(block) => Ok(vec![Action::PushBlock(Box::new(block))]),
            None => {
                self.errors.push(RuntimeError::Action {
                    action: "compile-children",
                    message: format!("no strategy matched statements {:?}", statement_ids),
                });
                Ok(vec![Action::NextBlock])
            }
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Handler actions first, then whatever the receiving blocks return.
    pub(super) fn collect_event_actions(
        &mut self,
        event: &RuntimeEvent,
    ) -> Result<Vec<Action>, RuntimeError> {
        debug!(event = %event.name, target = ?event.target(), "event");
        match event.name.as_str() {
            names::TIMER_PAUSE => self.paused = true,
            names::TIMER_RESUME => self.paused = false,
            _ => {}
        }

        let mut actions = self.events.dispatch(event);
        let keys: Vec<BlockKey> = self.stack.bottom_first().map(RuntimeBlock::key).collect();
        let receivers: Vec<usize> = match event.target() {
            Some(target) => self.stack.position(target).into_iter().collect(),
            None if event.is_broadcast() => (0..keys.len()).collect(),
            None => keys.len().checked_sub(1).into_iter().collect(),
        };

        let now = self.clock.now();
        for index in receivers {
            let ancestors: Vec<BlockKey> = keys[..index].iter().rev().copied().collect();
            let Some(block) = self.stack.get_mut(index) else {
                continue;
            };
            let mut env = BlockEnv {
                memory: &mut self.memory,
                script: &self.script,
                keys: &self.keys,
                ancestors: &ancestors,
                now,
                paused: self.paused,
            };
            match block.handle_event(event, &mut env) {
                Ok(produced) => actions.extend(produced),
                Err(err) => self.fail("deliver-event", err)?,
            }
        }
        Ok(actions)
    }
}
