pub mod informer;
pub mod runtime;
