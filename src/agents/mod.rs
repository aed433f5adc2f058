// Agent lifecycle: build, register, hot-swap and counted execution

pub mod builder;
pub mod capability;
pub mod executor;
pub mod instance;
pub mod poller;
pub mod registry;
pub mod task_counter;

// Re-export for convenience
pub use builder::{AgentBuilder, GenericAgentFactory, HandlerFactory, HandlerInput};
pub use capability::{
    Capability, CapabilityProxy, CapabilityRegistry, CapabilitySource, CurrentDateTool,
    RetryPolicy, ToolDescriptor,
};
pub use executor::AgentExecutor;
pub use instance::{
    AgentHandler, AgentInstance, GenericAgent, MemoryHandle, MessageWindow, WithMemory, WithTools,
};
pub use poller::{ChangeDetection, ConfigChangePoller, PollReport, PollerHandle};
pub use registry::{AgentRegistry, AgentTaskCount, ReloadOutcome};
pub use task_counter::{TaskCounter, TaskGuard};
