//! Authentication and authorization
//!
//! Each request resolves its session cookie to a full user record once;
//! downstream handlers check roles and the gap read predicate against
//! that record. The session store is the shared Postgres-backed
//! tower-sessions table, used by both HTTP and the realtime handshake.

pub mod middleware;
pub mod password;
pub mod rbac;

pub use middleware::{require_session_user, CurrentUser, SESSION_USER_KEY};
pub use rbac::{can_read_gap, read_scope, require_role};
