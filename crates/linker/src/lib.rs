//! `ferrum-linker` contains the linking drivers/strategies to actually link
//! object files together.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod archive;
mod configuration;
mod diagnostics;
#[cfg(feature = "elf64")]
mod elf64;
mod gc;
mod ids;
#[cfg(feature = "elf64")]
mod ingest;
mod input;
mod layout;
mod linker;
mod module;
mod patch_base;
mod pipeline;
mod relocator;
mod resolve;
mod script;
mod section;
mod trampoline;
#[cfg(feature = "elf64")]
mod writer;

pub use configuration::*;
#[cfg(feature = "elf64")]
pub use elf64::Error as Elf64Error;
#[cfg(feature = "elf64")]
pub use ingest::Error as IngestError;
pub use linker::*;
#[cfg(feature = "elf64")]
pub use writer::Error as WriterError;

/// This module contains all types to work with target tiple.
pub mod target {
    pub use target_lexicon::*;
}
