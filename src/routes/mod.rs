pub mod audit_logs;
pub mod auth;
pub mod entities;
pub mod entity_members;
pub mod entity_roles;
pub mod health;
pub mod permissions;
pub mod resources;
pub mod roles;
pub mod users;
