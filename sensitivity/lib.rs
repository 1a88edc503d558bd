#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod baseline;
pub mod bootstrap;
pub mod config;
pub mod css;
pub mod data;
pub mod fit;
pub mod ic50;
pub mod pipeline;
pub mod predict;
pub mod report;
pub mod score;
pub mod types;
