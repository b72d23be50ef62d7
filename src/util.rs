//! Small numeric helpers shared across the crate.

use std::fmt;
use std::mem::size_of;

/// Integer division of `n` by `d`, rounding up.
pub fn ceil_division(n: u64, d: u64) -> u64 {
    (n + d - 1) / d
}

/// Performs the log2 operation on the given integer.
///
/// If the result is undefined, the function returns None.
fn log2(n: u64) -> Option<u64> {
    let num_bits = (size_of::<u64>() * 8) as u64;

    let n = num_bits - n.leading_zeros() as u64;
    if n > 0 {
        Some(n - 1)
    } else {
        None
    }
}

/// Structure representing a number of bytes.
pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut order = log2(self.0).unwrap_or(0) / log2(1024).unwrap_or(1);

        let suffix = match order {
            0 => "bytes",
            1 => "KiB",
            2 => "MiB",
            3 => "GiB",
            4 => "TiB",

            _ => {
                order = 0;
                "bytes"
            }
        };

        let unit = 1024u64.pow(order as u32);
        write!(fmt, "{} {}", self.0 / unit, suffix)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ceil_div() {
        assert_eq!(ceil_division(0, 512), 0);
        assert_eq!(ceil_division(1, 512), 1);
        assert_eq!(ceil_division(512, 512), 1);
        assert_eq!(ceil_division(513, 512), 2);
        assert_eq!(ceil_division(3000, 512), 6);
    }

    #[test]
    fn bytesize() {
        assert_eq!(format!("{}", ByteSize(0)).as_str(), "0 bytes");
        assert_eq!(format!("{}", ByteSize(1023)).as_str(), "1023 bytes");
        assert_eq!(format!("{}", ByteSize(1024)).as_str(), "1 KiB");
        assert_eq!(format!("{}", ByteSize(512 * 1024)).as_str(), "512 KiB");
        assert_eq!(format!("{}", ByteSize(1024 * 1024)).as_str(), "1 MiB");
    }
}
