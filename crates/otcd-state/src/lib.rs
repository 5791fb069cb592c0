pub mod db;
pub mod deposit_tracker;
pub mod engine;
pub mod lease;
pub mod lock_eval;
pub mod plan_builder;
pub mod queue_processor;
pub mod recovery;
pub mod watcher;

pub use db::StateDb;
pub use deposit_tracker::DepositTracker;
pub use engine::DealEngine;
pub use lease::LeaseManager;
pub use queue_processor::QueueProcessor;
pub use recovery::CrashRecovery;
pub use watcher::LateDepositWatcher;
