pub mod audit;
pub mod entity;
pub mod rbac;
pub mod user;
