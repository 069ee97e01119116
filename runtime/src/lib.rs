pub mod action;
pub mod behavior;
pub mod block;
pub mod bootstrap;
pub mod clock;
pub mod completion;
pub mod compiler;
pub mod dialect;
pub mod error;
pub mod event;
pub mod memory;
pub mod script_runtime;
pub mod stack;
pub mod state;

pub use action::Action;
pub use block::{BlockKey, BlockType, RuntimeBlock};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compiler::JitCompiler;
pub use error::RuntimeError;
pub use event::{RuntimeEvent, names};
pub use memory::Memory;
pub use script_runtime::{RuntimeConfig, ScriptRuntime};
pub use stack::BlockStack;
pub use state::{ExecutionRecord, LifecycleState, RuntimeControls};
