pub mod buttons;
pub mod machine;
pub mod snapshot;
pub mod state;

pub use buttons::{ButtonMapping, ButtonMappingStore};
pub use machine::{
    lock_machine, shared, Session, SharedMachine, StateChange, StateMachine, StateNotification,
    TransitionOptions, WorkStateListener,
};
pub use snapshot::{JsonSnapshotStore, MemorySnapshotStore, SessionSnapshot, SnapshotStore};
pub use state::{
    default_action_to, default_actions, format_duration, WorkAction, WorkState, FINISH_WORK,
    RETURN_FROM_BREAK, START_BREAK, START_WORK,
};
