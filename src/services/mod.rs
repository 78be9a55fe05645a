pub mod admission;
pub mod fetch;
pub mod notifier;
pub mod result_store;
pub mod storage;
pub mod worker;
