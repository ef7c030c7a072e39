// crates/pulsecore/src/events/mod.rs

mod base;

pub use base::{
    EventBus, EventEmitter, EventSubscription, ExecutionEvent, NodeEvent, Transfer,
};
