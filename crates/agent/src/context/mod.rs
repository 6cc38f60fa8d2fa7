//! Context management: token estimation, prompt templates, session storage
//! and budget-constrained prompt assembly.

pub mod assembler;
pub mod store;
pub mod template;
pub mod token;

pub use assembler::{AssembledPrompt, AssemblyError, AssemblyMetadata, ContextAssembler, TokenBudget};
pub use store::{ContextStore, SessionSummary};
pub use template::PromptTemplate;
pub use token::TokenEstimator;
