//! # Strata Core
//!
//! Domain types, traits, and error definitions for the Strata context
//! assembly engine. It defines the domain model that all other crates
//! implement against and pulls in no HTTP or storage stack.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model backend, embedding backend, memory
//! storage) is a trait here. Implementations live in their respective
//! crates, so tests can swap in scripted stand-ins.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ContextError, Error, GenerationError, MemoryError, ProviderError, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{MemoryBackend, MemoryItem, MemoryTier};
pub use message::{Message, Role};
pub use provider::{Embedded, Embedder, Provider, ProviderRequest, ProviderResponse, Usage};
pub use session::{Attachment, Session, Task, TaskStatus, UserProfile};
pub use tool::{ToolCatalog, ToolDefinition};
