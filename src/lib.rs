//! This crate provides a user-space re-implementation of the runtime
//! services of a 16-bit segmented executable environment: the New
//! Executable loader, its cooperative task scheduler, segmented memory
//! managers, and the import/export and relocation machinery that ties
//! loaded modules together.
//!
//! Information on the on-disk layouts bases mostly on official documents
//! by IBM and Microsoft, but some of the facts from there are invalid and
//! fixed.
//!
//! ### Support
//!
//! This crate supports:
//!  - `MZ (mod mz)` DOS 16-bit outer headers
//!  - `NE (mod ne)` Windows 1.x-3x protected-mode 16-bit executables
//!
//! The runtime is the `reader`/`mz`/`ne`/`reloc`/`resolve`/`segmgr`/
//! `mem`/`module`/`task`/`facade` module set.
//!
//! ### Issues
//!
//! - Crate works correctly only with `LittleEndian` linked files;
//! - Some of the structures are undocumented;
//! - No support for VxD files.
//!

/// Bounds-checked byte-buffer cursor shared by every on-disk decoder below.
pub mod reader;
/// MZ/DOS outer header.
pub mod mz;
/// New Executable image: header, segment table, entry table, name tables,
/// module references, imported names, and the resource directory.
pub mod ne;
/// Relocation record decoding and in-place fixup application.
pub mod reloc;
/// Export table construction, ordinal/name lookup, and the stub registry.
pub mod resolve;
/// Live segment table: register/lock/unlock/evict/reload/compact.
pub mod segmgr;
/// Global (owner-tagged) and local (16-bit, no owner) memory managers.
pub mod mem;
/// Handle-allocated module table with dependency tracking and in-use guard.
pub mod module;
/// Cooperative task scheduler: priority-ordered run loop, yield, owner-sweep.
pub mod task;
/// Base-module facade: ordinal dispatch over files, memory, modules, tasks, atoms.
pub mod facade;
