//! Upload request validation.
//!
//! A validator answers three independent questions about an upload: may this
//! caller submit keys, which date does a submitted key effectively carry, and
//! is the submission a decoy. Keeping them separate lets the caller spend the
//! same validation cost on real and decoy uploads.
//!
//! # Usage
//!
//! ```ignore
//! use gaen_trust::validation::{Authentication, ClaimValidator, RequestValidator};
//!
//! let validator = ClaimValidator::default();
//! if !validator.is_valid(&auth) {
//!     return Err(/* unauthorized */);
//! }
//! let key_date = validator.get_key_date(now, &auth, Some(&key))?;
//! let fake = validator.is_fake_request(&auth, Some(&key))?;
//! ```

pub mod error;
pub mod types;
pub mod validator;

pub use error::ValidationError;
pub use types::{AuthClaims, Authentication};
pub use validator::{ClaimValidator, PermissiveValidator, RequestValidator, ValidatorConfig};
