mod context;
mod engine;
mod job;
mod state;
mod wait;

pub use context::{ExecutionContext, FailureCause, Outcome, RunReport};
pub use engine::{Engine, EngineConfig, RunObserver};
pub use job::{
    EncryptionMode, JobHandle, JobRequest, JobStatus, OutputDestination, ResultSet, RetryConfig,
    Row,
};
pub use state::{Action, Event, State, StateMachine, Transition, UnknownStatusPolicy, decide, decide_with};
pub use wait::{Deadline, Interrupt, WaitPolicy, wait};
