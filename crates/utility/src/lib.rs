pub mod retry;
pub mod shutdown_signal;
