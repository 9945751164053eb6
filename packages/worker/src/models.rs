pub mod aggregator;
pub mod checker;
pub mod judge;
pub mod runtime;
pub mod sandbox;
pub mod worker;
