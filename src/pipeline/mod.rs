//! The three long-lived worker roles of spec.md §5: log submit/wait, data
//! submit/wait/GC, checkpoint timer. This module groups the in-memory IO
//! entities plus the two pipeline stages that move a write-pack from "built"
//! to "durable on both devices".

pub mod entry;
pub mod gc;
pub mod submit;
pub mod waiter;

pub use entry::{BioEntry, Done, EntryId, PackId, RequestEntry, WriteFlags, WritePack};
