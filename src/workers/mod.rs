pub mod token_cleanup;

pub use token_cleanup::TokenCleanupWorker;
