//! Repository Implementations
//!
//! PostgreSQL implementations of the domain collaborator traits plus the
//! JWT token verifier.

mod conversation_directory;
mod delivery_repository;
mod message_store;
mod token_verifier;

pub use conversation_directory::PgConversationDirectory;
pub use delivery_repository::PgDeliveryRepository;
pub use message_store::PgMessageStore;
pub use token_verifier::JwtTokenVerifier;
