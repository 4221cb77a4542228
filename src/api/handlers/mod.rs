//! API handlers for the course wiki admin surface.
//!
//! `auth` holds the session-security core (credentials, sessions, CSRF, rate
//! limits, access gates and the login/logout handlers); the remaining modules
//! are the pages and actions it protects.

pub mod admin;
pub mod auth;
pub mod catalog;
pub mod health;
pub mod root;
