//! Repository functions: one function per database operation.
//!
//! Every function takes a `&PgPool` and returns a `Result<T, DbError>`.
//! Pure SQL with no business logic or domain types.

pub mod executions;
pub mod schedules;
pub mod webhooks;
pub mod workflows;
