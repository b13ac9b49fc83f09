pub mod auth;
pub mod booking;
pub mod config;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod routes;
pub mod store;
pub mod tickets;
pub mod utils;

#[cfg(test)]
mod testing;
