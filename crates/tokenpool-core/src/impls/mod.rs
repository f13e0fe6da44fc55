//! Implementations of the ports (開発・テスト用).

pub mod memory_store;

pub use self::memory_store::{InMemoryStore, InjectedFault, ViewPredicate};
