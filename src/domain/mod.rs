//! # Domain Layer
//!
//! Core types of the delivery subsystem and the trait contracts for its
//! external collaborators (credential verification, conversation membership,
//! message persistence, delivery bookkeeping).
//!
//! No dependencies on infrastructure or presentation layers.

pub mod collaborators;
pub mod entities;

pub use collaborators::{
    AuthError, ConversationDirectory, MessageStore, TokenVerifier, VerifiedIdentity,
};
pub use entities::*;
