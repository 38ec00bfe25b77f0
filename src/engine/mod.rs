pub mod assignment;
pub mod compensation;
pub mod failure;
pub mod llm;
pub mod prompt;
pub mod queue;
pub mod scoring;
pub mod suggest;
