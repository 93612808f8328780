//! Gatekeeper - In-process Rate Limiting for Authentication Flows
//!
//! This crate implements a fixed-window rate limiter that guards
//! abuse-sensitive actions (login, signup, password reset, email
//! verification, checkout). Windows live in process memory, keyed by
//! action and client identifier, and are evicted by a background sweeper.

pub mod config;
pub mod error;
pub mod identity;
pub mod ratelimit;
pub mod replay;
