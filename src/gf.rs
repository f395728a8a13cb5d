/*! GF(2⁸) arithmetic.

Log/antilog tables over the field generated by the primitive
polynomial x⁸+x⁴+x³+x²+1 (0x11D), the field shared by FX.25 and IL2P
Reed-Solomon codes.

The tables are built once and shared process-wide; [`tables()`] hands
out a `'static` reference, so the field can be used from any thread
without locking.
 */
use std::sync::OnceLock;

/// Primitive polynomial of the field, x⁸+x⁴+x³+x²+1.
pub const PRIMITIVE_POLY: u16 = 0x11D;

/// Sentinel stored in `index_of[0]`. log(0) is undefined.
const LOG_ZERO: u8 = 0xFF;

/// GF(2⁸) log and antilog tables.
///
/// `alpha_to[i]` is α^i for i in 0..255; `index_of[v]` is log_α(v)
/// for nonzero v. Immutable after construction.
pub struct GaloisField {
    alpha_to: [u8; 255],
    index_of: [u8; 256],
}

impl GaloisField {
    fn new() -> Self {
        let mut alpha_to = [0u8; 255];
        let mut index_of = [LOG_ZERO; 256];
        let mut sr: u16 = 1;
        for i in 0..255 {
            alpha_to[i] = sr as u8;
            index_of[sr as usize] = i as u8;
            sr <<= 1;
            if sr & 0x100 != 0 {
                sr ^= PRIMITIVE_POLY;
            }
        }
        Self { alpha_to, index_of }
    }

    /// α^i, for any exponent.
    pub fn alpha(&self, i: usize) -> u8 {
        self.alpha_to[i % 255]
    }

    /// α^-i, for any exponent.
    pub fn alpha_inv(&self, i: usize) -> u8 {
        self.alpha_to[(255 - (i % 255)) % 255]
    }

    /// Addition. Same as subtraction in characteristic 2.
    pub fn add(&self, a: u8, b: u8) -> u8 {
        a ^ b
    }

    /// Multiplication via the log tables.
    pub fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        let sum = self.index_of[a as usize] as usize + self.index_of[b as usize] as usize;
        self.alpha_to[sum % 255]
    }

    /// Division. `b` must be nonzero.
    pub fn div(&self, a: u8, b: u8) -> u8 {
        debug_assert!(b != 0);
        if a == 0 || b == 0 {
            return 0;
        }
        let diff = 255 + self.index_of[a as usize] as usize - self.index_of[b as usize] as usize;
        self.alpha_to[diff % 255]
    }

    /// a^n.
    pub fn pow(&self, a: u8, n: usize) -> u8 {
        if a == 0 {
            return if n == 0 { 1 } else { 0 };
        }
        let exp = self.index_of[a as usize] as usize * n;
        self.alpha_to[exp % 255]
    }

    /// Multiplicative inverse. `a` must be nonzero.
    pub fn inv(&self, a: u8) -> u8 {
        debug_assert!(a != 0);
        self.alpha_inv(self.index_of[a as usize] as usize)
    }
}

/// The process-wide field tables.
pub fn tables() -> &'static GaloisField {
    static TABLES: OnceLock<GaloisField> = OnceLock::new();
    TABLES.get_or_init(GaloisField::new)
}
