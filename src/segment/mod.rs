//! Component A: byte I/O and the segment-filename pool.

pub mod descriptor;
pub mod naming;
pub mod pool;

pub use descriptor::{SectionDescriptor, SegmentHeader, SECTION_DESCRIPTOR_SIZE, SEGMENT_HEADER_SIZE};
pub use naming::NamingScheme;
pub use pool::SegmentPool;
