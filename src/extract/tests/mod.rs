#[cfg(feature = "mmap-async-tokio")]
mod integration_tests;
mod ranges_tests;
mod relevant_tests;
