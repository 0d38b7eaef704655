//! Compressed bitmaps and the coders built on top of them.
//!
//! The [`EwahBitmap`] is the primitive every index is made of. Coders
//! translate values into bit positions across one or more bitmaps;
//! binners reduce the value domain before coding.

mod binner;
mod coder;
mod ewah;
mod multi_level;

pub use binner::Binner;
pub use coder::{BitsliceCoder, Coder, DigitCoder, EqualityCoder, RangeCoder, SingletonCoder};
pub use ewah::EwahBitmap;
pub use multi_level::{Base, MultiLevelCoder};
