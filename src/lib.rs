pub mod aggregate;
pub mod calendar;
pub mod config;
pub mod expand;
pub mod fares;
pub mod gtfs;
pub mod ids;
pub mod pipeline;
pub mod store;
