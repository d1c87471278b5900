#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod config;
pub mod data;
pub mod folds;
pub mod grid;
pub mod holdout;
pub mod metrics;
pub mod models;
pub mod plot;
pub mod report;
pub mod search;
pub mod survival;
