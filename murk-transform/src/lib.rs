//! `murk-transform`: the source-to-source obfuscating transforms (spec
//! §4.5-4.9) -- the compiler transform pipeline, the literal obfuscator,
//! the `global_asm!` rewriter, the linker-argv rewriter, and the narrowed
//! runtime source patches.

pub mod asm;
pub mod comments;
pub mod compiler;
pub mod error;
pub mod ffi_exports;
pub mod linker;
pub mod literals;
pub mod rewrite;
pub mod rng;
pub mod runtime_patch;
pub mod salt_index;

pub use compiler::{transform_crate, CrateContext, CrateOutput, SourceFile};
pub use error::{Error, Result};
pub use rewrite::{RenameMap, Renamer};
pub use salt_index::StructSaltIndex;
