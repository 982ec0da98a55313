//! Authorization core.
//!
//! Decides whether a principal may perform an action on a resource, merging
//! two grant sources: global role grants and entity-scoped entity-role
//! grants. The resolver is a pure read path over point-in-time storage
//! state; the guard middleware wires it in front of route handlers.

mod guard;
mod legacy;
mod principal;
mod resolver;

pub use guard::{enforce, RouteGuard};
pub use legacy::{import_flat_roles, FlatRole, ImportReport};
pub use principal::Principal;
pub use resolver::{Authorize, Decision, GrantResolver};

/// Well-known global role names.
pub mod roles {
    /// The omnipotent role: bypasses all grant checks so the bootstrap
    /// account can never be locked out by missing or corrupted grant rows.
    pub const GODMODE: &str = "godmode";
    pub const ADMIN: &str = "admin";
    pub const USER: &str = "user";
}

/// Well-known permission (action) names.
pub mod permissions {
    pub const VIEW: &str = "view";
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    /// Subsumes view/create/update/delete on the same resource.
    pub const MANAGE: &str = "manage";
}
