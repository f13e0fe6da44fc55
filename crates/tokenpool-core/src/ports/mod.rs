//! Ports - 抽象化レイヤー
//!
//! The document store is the only external system the pool talks to; every
//! other component is written against [`DocumentStore`].

pub mod document_store;

pub use self::document_store::{
    BatchSaveResult, DEFAULT_DESIGN_DOC, DocumentStore, ViewRef, fetch_record, save_record,
};
