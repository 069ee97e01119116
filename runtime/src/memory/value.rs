use serde::Serialize;
use wod::fragment::Fragment;

use crate::state::{ExecutionRecord, LoopState, RuntimeControls, RuntimeMetric, TimerState};

/// Everything a memory cell can hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum MemoryValue {
    Number(f64),
    Integer(i64),
    Flag(bool),
    Text(String),
    Fragment(Fragment),
    Fragments(Vec<Fragment>),
    Metric(RuntimeMetric),
    Metrics(Vec<RuntimeMetric>),
    Timer(TimerState),
    Loop(LoopState),
    Record(ExecutionRecord),
    Controls(RuntimeControls),
}

impl MemoryValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            MemoryValue::Number(_) => "Number",
            MemoryValue::Integer(_) => "Integer",
            MemoryValue::Flag(_) => "Flag",
            MemoryValue::Text(_) => "Text",
            MemoryValue::Fragment(_) => "Fragment",
            MemoryValue::Fragments(_) => "Fragments",
            MemoryValue::Metric(_) => "Metric",
            MemoryValue::Metrics(_) => "Metrics",
            MemoryValue::Timer(_) => "Timer",
            MemoryValue::Loop(_) => "Loop",
            MemoryValue::Record(_) => "Record",
            MemoryValue::Controls(_) => "Controls",
        }
    }
}

/// A Rust type that maps onto one `MemoryValue` variant. Typed references
/// use it to read and write cells without matching by hand.
pub trait MemoryType: Sized {
    const TYPE_NAME: &'static str;

    fn into_value(self) -> MemoryValue;
    fn from_value(value: &MemoryValue) -> Option<Self>;
}

macro_rules! memory_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl MemoryType for $ty {
                const TYPE_NAME: &'static str = stringify!($variant);

                fn into_value(self) -> MemoryValue {
                    MemoryValue::$variant(self)
                }

                fn from_value(value: &MemoryValue) -> Option<Self> {
                    match value {
                        MemoryValue::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

memory_type! {
    f64 => Number,
    i64 => Integer,
    bool => Flag,
    String => Text,
    Fragment => Fragment,
    Vec<Fragment> => Fragments,
    RuntimeMetric => Metric,
    Vec<RuntimeMetric> => Metrics,
    TimerState => Timer,
    LoopState => Loop,
    ExecutionRecord => Record,
    RuntimeControls => Controls,
}
