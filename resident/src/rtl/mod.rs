//! Runtime Library
//!
//! Pure helpers shared by both resident drivers. Nothing in here touches
//! hardware or DOS memory.
//!
//! - **lfn** - long file name hashing and 8.3 mangling
//! - **nls** - code page 437 <-> UTF-8 translation
//! - **scale** - fixed-point mickey scaling and grid snapping
//! - **unixtime** - DOS packed date/time <-> Unix nanoseconds

pub mod lfn;
pub mod nls;
pub mod scale;
pub mod unixtime;

pub use lfn::{fcb_name_from_host, is_valid_fcb_char, lfn_name_hash, mangle_to_fcb_name, FcbName};
pub use scale::{scale_with_carry, snap};
pub use unixtime::{dos_to_timestamp, timestamp_to_dos, DosDateTime};
