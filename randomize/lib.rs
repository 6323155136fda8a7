#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod assign;
pub mod balance;
pub mod classifier;
pub mod data;
pub mod logistic;
pub mod progress;
pub mod report;
