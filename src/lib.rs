pub mod config;
pub mod error;
pub mod guards;
pub mod ir;
pub mod models;
pub mod pipeline;
pub mod textutil;
