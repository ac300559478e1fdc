pub mod auth;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod features;
pub mod fetch;
pub mod geocode;
pub mod impute;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod unify;
