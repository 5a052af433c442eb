//! Repository implementations for database operations.

mod application_repo;

pub use application_repo::ApplicationRepository;
