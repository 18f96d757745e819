//! Shared utilities for fspotfs mount backends.
//!
//! A mount backend turns kernel requests into calls on
//! [`VfsCore`](fspotfs_core::VfsCore). The pieces every backend needs live
//! here:
//!
//! - [`ErrorCategory`] - classification of engine errors into errno values
//! - [`HandleTable`] - thread-safe map of open handles
//! - [`WriteBuffer`] - bytes of a newly created file, held until release
//! - [`path_mapper::PathTable`] - bidirectional virtual path to id mapping
//! - [`force_unmount`] - detaches a mountpoint whose session is stuck
//!
//! # Example
//!
//! ```
//! use fspotfs_core::VirtualPath;
//! use fspotfs_mount::{HandleTable, WriteBuffer};
//!
//! let mut buffer = WriteBuffer::new(VirtualPath::new("/Vacation/p1.jpg"));
//! buffer.write(0, b"jpeg").unwrap();
//!
//! let handles: HandleTable<u64, WriteBuffer> = HandleTable::new_auto_id();
//! let fh = handles.insert_auto(buffer);
//! assert_eq!(handles.get(&fh).map(|b| b.len()), Some(4));
//! ```

#![warn(clippy::all)]

mod error_category;
mod force_unmount;
mod handle_table;
pub mod path_mapper;
mod write_buffer;

pub use error_category::{io_error_to_errno, ErrorCategory};
pub use force_unmount::force_unmount;
pub use handle_table::HandleTable;
pub use write_buffer::WriteBuffer;
