//! Credential handling.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <token>
//!     → token.rs extract_bearer
//!     → CredentialValidator::validate (HS256 JWT)
//!     → Claims → ClaimsContext handed to the handler
//! ```

pub mod token;

pub use token::{
    extract_bearer, Claims, ClaimsContext, CredentialError, CredentialValidator, JwtValidator,
};
