/// Service boundary over a repository.
pub mod crud_service;
/// Condition → query compilation.
pub mod filter_compiler;
/// Generic repository.
pub mod repository;

pub use crud_service::{CrudService, ServiceError, ServiceResult};
pub use filter_compiler::AttributeFilterCompiler;
pub use repository::{Repository, RepositoryOptions};
