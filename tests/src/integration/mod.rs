//! Cross-component scenarios.

#[cfg(test)]
pub(crate) mod harness;

mod accounts;
mod execution;
mod filters;
mod subscriptions;
