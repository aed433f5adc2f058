// Prompt templating for agent system prompts

pub mod engine;

pub use engine::{inject_standard_variables, PromptEngine, RenderError, VariableMap};
