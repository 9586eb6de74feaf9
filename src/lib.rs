//! Content cache core for the resort site.
//!
//! Public pages read rooms, offers, events and blog content through
//! [`cache::ContentCache`]; admin mutations bump namespace versions and push
//! signed revalidation webhooks through [`cache::InvalidationTrigger`].

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
