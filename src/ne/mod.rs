//! New Executable (NE) parsing: the on-disk format for 16-bit,
//! protected-mode segmented executables (Windows 1.x-3.x, OS/2 1.x).
//! See spec.md §4.1 and §6 for the normative layout.
//!
//! ```
//! use ne286rt::ne::ParserImage;
//!
//! let buf = std::fs::read("app.exe").unwrap_or_default();
//! if let Ok(image) = ParserImage::parse(&buf) {
//!     let _ = image.header.e_cseg;
//! }
//! ```

pub mod entry;
pub mod header;
pub mod image;
pub mod modref;
pub mod names;
pub mod resource;
pub mod segment;

pub use entry::{Entry, EntryTable, FixedEntry, MovableEntry};
pub use header::{ModuleFlags, NeHeader};
pub use image::{NeError, ParserImage};
pub use modref::{ImportedNameTable, ModuleRefTable};
pub use names::{NameEntry, NameTable};
pub use resource::{ResourceEntry, ResourceTable};
pub use segment::{SegmentDescriptor, SegmentFlags};
