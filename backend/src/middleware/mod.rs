//! Request middleware

pub mod auth;

pub use auth::{auth_middleware, encode_operator_token, CurrentOperator, Operator};
