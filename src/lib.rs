pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod escape;
pub mod model;
pub mod routes;
pub mod services;
pub mod state;
pub mod units;

#[cfg(test)]
pub(crate) mod test_support;
