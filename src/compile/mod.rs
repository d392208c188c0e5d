//! Build cache: source transform, single-flight compilation, external compiler

mod cache;
mod esbuild;
mod transform;

pub use cache::{BuildCache, CompileError, Compiler};
pub use esbuild::ExternalCompiler;
pub use transform::wrap_top_level;
