//! The seven provisioning stages, one module each
//!
//! Every stage is idempotent against the real control planes: re-running it
//! with the same names either reuses what exists or redefines it in place.

mod credentials;
mod identity;
mod policy;
mod role;
mod storage;
mod trust;
mod volume;

pub use credentials::{extract_credentials, parse_credentials, LocationKey, LOCATION_KEYS};
pub use identity::resolve_identity;
pub use policy::ensure_policy;
pub use role::{ensure_role, ROLE_DESCRIPTION};
pub use storage::ensure_bucket;
pub use trust::{reconcile_trust, verify_trust};
pub use volume::ensure_external_volume;
