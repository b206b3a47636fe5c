pub mod latency;
pub mod pods;
