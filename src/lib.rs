//! Compact ordered sequence container.
//!
//! Values (raw byte strings or 64-bit signed integers) are packed into
//! contiguous byte-array segments, and the segments are chained into a
//! doubly linked list. Numeric strings are stored in a binary integer
//! form when that is smaller than their text form.
//!
//! ```
//! use packlist::{ChunkedList, Value};
//!
//! let mut list = ChunkedList::new();
//! list.push_tail(32, b"hello");
//! list.push_tail(32, b"365");
//! assert_eq!(list.count(), 2);
//! assert_eq!(list.pop_tail(), Some(Value::Int(365)));
//! assert_eq!(list.pop_head(), Some(Value::Str(b"hello".to_vec())));
//! ```

pub mod chunked;
pub mod segment;

pub use chunked::chunked::{ChunkEntry, ChunkedList};
pub use chunked::iter::{ChunkedIter, Direction};
pub use segment::error::SegmentError;
pub use segment::segment::{Segment, Value};
