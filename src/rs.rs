/*! Reed-Solomon codec over GF(2⁸).

Systematic RS(255, k) codes with generator roots α¹..α^2t, the family
used by both FX.25 and IL2P. Shortened codes are supported by treating
the leading data positions as implicit zeros, which is how the IL2P
header block and the short FX.25 correlation tag codes are defined.

Encoding is polynomial division by the generator; decoding is the
standard syndrome / Berlekamp-Massey / Chien / Forney pipeline. The
decoder never partially corrects: a codeword either comes back clean,
fully corrected, or flagged uncorrectable with the received data
untouched.
 */
use crate::gf::{self, GaloisField};
use crate::{Error, Result};

/// Code length of the underlying (unshortened) code.
pub const CODE_LEN: usize = 255;

/// Outcome of decoding one codeword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// All syndromes zero; data returned as received.
    Clean(Vec<u8>),
    /// Errors found and corrected. Carries the corrected data and the
    /// number of symbol errors fixed.
    Corrected(Vec<u8>, usize),
    /// More errors than the code can correct. Carries the received
    /// data prefix unmodified.
    Uncorrectable(Vec<u8>),
}

impl Decoded {
    /// The data prefix, whatever the outcome.
    pub fn data(&self) -> &[u8] {
        match self {
            Decoded::Clean(d) | Decoded::Corrected(d, _) | Decoded::Uncorrectable(d) => d,
        }
    }

    /// True unless the codeword was uncorrectable.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Decoded::Uncorrectable(_))
    }

    /// Take the data, mapping uncorrectable codewords to an error.
    pub fn into_data(self) -> Result<Vec<u8>> {
        match self {
            Decoded::Clean(d) | Decoded::Corrected(d, _) => Ok(d),
            Decoded::Uncorrectable(_) => {
                Err(Error::UncorrectableFec("codeword beyond correction capability".into()))
            }
        }
    }
}

/// A Reed-Solomon (255, k) code.
pub struct ReedSolomon {
    k: usize,
    /// Generator polynomial, leading coefficient first. `gen[0]` is
    /// always 1; degree is 255-k.
    gen: Vec<u8>,
    gf: &'static GaloisField,
}

impl ReedSolomon {
    /// Create a code with `k` data symbols and `255-k` parity symbols.
    ///
    /// The parity count must be even and nonzero.
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 || k >= CODE_LEN {
            return Err(Error::invalid(format!("unsupported RS data length {k}")));
        }
        let nroots = CODE_LEN - k;
        if nroots % 2 != 0 {
            return Err(Error::invalid(format!("odd RS parity count {nroots}")));
        }
        let gf = gf::tables();
        // g(x) = (x - α¹)(x - α²)...(x - α^2t), built one root at a time.
        let mut gen = vec![0u8; nroots + 1];
        gen[0] = 1;
        for i in 1..=nroots {
            let root = gf.alpha(i);
            for m in (1..=i).rev() {
                gen[m] = gen[m] ^ gf.mul(root, gen[m - 1]);
            }
        }
        Ok(Self { k, gen, gf })
    }

    /// Data symbols per codeword.
    pub fn data_len(&self) -> usize {
        self.k
    }

    /// Parity symbols per codeword.
    pub fn parity_len(&self) -> usize {
        CODE_LEN - self.k
    }

    /// Symbol errors correctable per codeword, t = (n-k)/2.
    pub fn correctable(&self) -> usize {
        self.parity_len() / 2
    }

    /// Systematic encode of exactly `k` data symbols into a 255 symbol
    /// codeword: data in positions [0, k), parity in [k, 255).
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() != self.k {
            return Err(Error::invalid(format!(
                "RS encode wants {} data symbols, got {}",
                self.k,
                data.len()
            )));
        }
        let nroots = self.parity_len();
        // Divide x^2t · d(x) by g(x); the remainder is the parity.
        let mut scratch = vec![0u8; CODE_LEN];
        scratch[..self.k].copy_from_slice(data);
        for i in 0..self.k {
            let coef = scratch[i];
            if coef != 0 {
                for j in 1..=nroots {
                    scratch[i + j] ^= self.gf.mul(self.gen[j], coef);
                }
            }
        }
        let mut codeword = Vec::with_capacity(CODE_LEN);
        codeword.extend_from_slice(data);
        codeword.extend_from_slice(&scratch[self.k..]);
        Ok(codeword)
    }

    /// Encode a shortened block of up to `k` data symbols. The output
    /// is `data.len() + parity_len()` symbols; the omitted leading
    /// positions are implicit zeros.
    pub fn encode_shortened(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > self.k {
            return Err(Error::invalid(format!(
                "shortened RS block of {} exceeds data length {}",
                data.len(),
                self.k
            )));
        }
        let pad = self.k - data.len();
        let mut full = vec![0u8; pad];
        full.extend_from_slice(data);
        let codeword = self.encode(&full)?;
        let mut out = codeword[pad..self.k].to_vec();
        out.extend_from_slice(&codeword[self.k..]);
        Ok(out)
    }

    /// Decode a full 255 symbol codeword. Returns the k data symbols.
    pub fn decode(&self, received: &[u8]) -> Result<Decoded> {
        if received.len() != CODE_LEN {
            return Err(Error::invalid(format!(
                "RS decode wants {CODE_LEN} symbols, got {}",
                received.len()
            )));
        }
        let mut buf = received.to_vec();
        let outcome = self.correct(&mut buf);
        buf.truncate(self.k);
        Ok(match outcome {
            Correction::Clean => Decoded::Clean(buf),
            Correction::Fixed(n) => Decoded::Corrected(buf, n),
            Correction::Failed => {
                // Hand back what was received, untouched.
                let mut data = received.to_vec();
                data.truncate(self.k);
                Decoded::Uncorrectable(data)
            }
        })
    }

    /// Decode a shortened block of `m + parity_len()` symbols, m ≤ k.
    /// Returns the m data symbols.
    pub fn decode_shortened(&self, received: &[u8]) -> Result<Decoded> {
        let nroots = self.parity_len();
        if received.len() < nroots || received.len() > CODE_LEN {
            return Err(Error::invalid(format!(
                "bad shortened RS block length {}",
                received.len()
            )));
        }
        let m = received.len() - nroots;
        let pad = self.k - m;
        let mut full = vec![0u8; pad];
        full.extend_from_slice(received);
        Ok(match self.decode(&full)? {
            Decoded::Clean(d) => Decoded::Clean(d[pad..].to_vec()),
            Decoded::Corrected(d, n) => Decoded::Corrected(d[pad..].to_vec(), n),
            Decoded::Uncorrectable(d) => Decoded::Uncorrectable(d[pad..].to_vec()),
        })
    }

    /// Compute syndromes S_i = R(α^(i+1)).
    fn syndromes(&self, buf: &[u8]) -> (Vec<u8>, bool) {
        let nroots = self.parity_len();
        let mut synd = vec![0u8; nroots];
        let mut any = false;
        for (i, s) in synd.iter_mut().enumerate() {
            let a = self.gf.alpha(i + 1);
            let mut acc = 0u8;
            for &b in buf {
                acc = self.gf.mul(acc, a) ^ b;
            }
            *s = acc;
            any |= acc != 0;
        }
        (synd, any)
    }

    /// Berlekamp-Massey: error locator Λ(x) and its degree L.
    fn berlekamp_massey(&self, synd: &[u8]) -> (Vec<u8>, usize) {
        let nroots = synd.len();
        let mut lambda = vec![0u8; nroots + 1];
        let mut prev = vec![0u8; nroots + 1];
        lambda[0] = 1;
        prev[0] = 1;
        let mut l = 0usize;
        let mut m = 1usize;
        let mut b = 1u8;
        for n in 0..nroots {
            let mut d = synd[n];
            for i in 1..=l {
                d ^= self.gf.mul(lambda[i], synd[n - i]);
            }
            if d == 0 {
                m += 1;
            } else {
                let t = lambda.clone();
                let coef = self.gf.div(d, b);
                for i in 0..=nroots {
                    if i + m > nroots {
                        break;
                    }
                    if prev[i] != 0 {
                        lambda[i + m] ^= self.gf.mul(coef, prev[i]);
                    }
                }
                if 2 * l <= n {
                    l = n + 1 - l;
                    prev = t;
                    b = d;
                    m = 1;
                } else {
                    m += 1;
                }
            }
        }
        (lambda, l)
    }

    /// Chien search: positions (array indices) where errors sit.
    fn chien(&self, lambda: &[u8], l: usize) -> Vec<usize> {
        let mut positions = Vec::new();
        for i in 0..CODE_LEN {
            // Evaluate Λ at α^-i; a root there puts the error at
            // position n-1-i.
            let x = self.gf.alpha_inv(i);
            let mut sum = 0u8;
            let mut xp = 1u8;
            for &c in lambda.iter().take(l + 1) {
                sum ^= self.gf.mul(c, xp);
                xp = self.gf.mul(xp, x);
            }
            if sum == 0 {
                positions.push(CODE_LEN - 1 - i);
            }
        }
        positions
    }

    fn correct(&self, buf: &mut [u8]) -> Correction {
        let nroots = self.parity_len();
        let (synd, any) = self.syndromes(buf);
        if !any {
            return Correction::Clean;
        }
        let (lambda, l) = self.berlekamp_massey(&synd);
        if l == 0 || l > self.correctable() {
            return Correction::Failed;
        }
        let positions = self.chien(&lambda, l);
        if positions.len() != l {
            return Correction::Failed;
        }

        // Forney: Ω(x) = S(x)·Λ(x) mod x^2t, error value at each
        // position is Ω(Xᵢ⁻¹) / Λ'(Xᵢ⁻¹).
        let mut omega = vec![0u8; nroots];
        for i in 0..nroots {
            let mut acc = synd[i];
            for j in 1..=i.min(l) {
                acc ^= self.gf.mul(lambda[j], synd[i - j]);
            }
            omega[i] = acc;
        }
        for &pos in &positions {
            let inv_log = CODE_LEN - 1 - pos;
            let xinv = self.gf.alpha_inv(inv_log);
            let mut num = 0u8;
            let mut xp = 1u8;
            for &c in &omega {
                num ^= self.gf.mul(c, xp);
                xp = self.gf.mul(xp, xinv);
            }
            // Formal derivative over characteristic 2: only odd degree
            // terms survive.
            let mut den = 0u8;
            for j in (1..=l).step_by(2) {
                den ^= self.gf.mul(lambda[j], self.gf.pow(xinv, j - 1));
            }
            if den == 0 {
                return Correction::Failed;
            }
            buf[pos] ^= self.gf.div(num, den);
        }

        // A successful correction must leave a true codeword behind.
        let (_, residual) = self.syndromes(buf);
        if residual {
            return Correction::Failed;
        }
        Correction::Fixed(positions.len())
    }
}

enum Correction {
    Clean,
    Fixed(usize),
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_poly_t1() {
        // For two roots, g(x) = (x+α)(x+α²) = x² + (α+α²)x + α³.
        let rs = ReedSolomon::new(253).unwrap();
        assert_eq!(rs.gen, vec![1, 6, 8]);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(ReedSolomon::new(0).is_err());
        assert!(ReedSolomon::new(255).is_err());
        assert!(ReedSolomon::new(254).is_err());
        for k in [239, 223, 191, 159, 127, 95, 63, 31, 247] {
            assert!(ReedSolomon::new(k).is_ok(), "k={k}");
        }
    }

    #[test]
    fn clean_roundtrip_all_profiles() -> anyhow::Result<()> {
        for k in [239, 223, 191, 127, 31, 247] {
            let rs = ReedSolomon::new(k)?;
            let data: Vec<u8> = (0..k).map(|i| (i * 7 % 256) as u8).collect();
            let codeword = rs.encode(&data)?;
            assert_eq!(codeword.len(), CODE_LEN);
            assert_eq!(&codeword[..k], &data[..]);
            match rs.decode(&codeword)? {
                Decoded::Clean(d) => assert_eq!(d, data),
                other => panic!("expected clean decode, got {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn corrects_up_to_t_errors() -> anyhow::Result<()> {
        // RS(255,239), t = 8, the profile from the FX.25 Tag 0x01 code.
        let rs = ReedSolomon::new(239)?;
        let data: Vec<u8> = (0..239).map(|i| (i % 256) as u8).collect();
        let codeword = rs.encode(&data)?;

        let mut corrupted = codeword.clone();
        for &pos in &[3usize, 17, 88, 202, 250, 254, 128, 0] {
            corrupted[pos] ^= 0xA5;
        }
        match rs.decode(&corrupted)? {
            Decoded::Corrected(d, n) => {
                assert_eq!(d, data);
                assert_eq!(n, 8);
            }
            other => panic!("expected corrected decode, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn reports_uncorrectable_beyond_t() -> anyhow::Result<()> {
        let rs = ReedSolomon::new(239)?;
        let data: Vec<u8> = (0..239).map(|i| (i % 256) as u8).collect();
        let codeword = rs.encode(&data)?;

        let mut corrupted = codeword.clone();
        for &pos in &[3usize, 17, 88, 202, 250, 254, 128, 0, 42] {
            corrupted[pos] ^= 0xA5;
        }
        match rs.decode(&corrupted)? {
            Decoded::Uncorrectable(d) => {
                // Received data prefix, unmodified.
                assert_eq!(d, &corrupted[..239]);
            }
            Decoded::Corrected(d, _) => {
                // A nine error pattern may in principle land on another
                // codeword, but it must never decode to different data
                // while claiming success on the original.
                assert_ne!(d, data, "9 errors silently rolled back to the original");
            }
            Decoded::Clean(_) => panic!("corrupted codeword decoded clean"),
        }
        Ok(())
    }

    #[test]
    fn random_error_patterns() -> anyhow::Result<()> {
        use rand::Rng;
        let mut rng = rand::rng();
        let rs = ReedSolomon::new(223)?;
        let t = rs.correctable();
        for _ in 0..20 {
            let data: Vec<u8> = (0..223).map(|_| rng.random_range(0..=255)).collect();
            let codeword = rs.encode(&data)?;
            let mut corrupted = codeword.clone();
            let nerr = rng.random_range(1..=t);
            let mut positions = Vec::new();
            while positions.len() < nerr {
                let p = rng.random_range(0..CODE_LEN);
                if !positions.contains(&p) {
                    positions.push(p);
                }
            }
            for &p in &positions {
                let e = rng.random_range(1..=255) as u8;
                corrupted[p] ^= e;
            }
            match rs.decode(&corrupted)? {
                Decoded::Corrected(d, n) => {
                    assert_eq!(d, data);
                    assert_eq!(n, nerr);
                }
                other => panic!("expected correction of {nerr} errors, got {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn shortened_roundtrip_with_errors() -> anyhow::Result<()> {
        // The IL2P header geometry: 13 data symbols, 2 parity.
        let rs = ReedSolomon::new(253)?;
        let data = [0x12u8, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 1, 2, 3, 4, 5];
        let block = rs.encode_shortened(&data)?;
        assert_eq!(block.len(), 15);

        match rs.decode_shortened(&block)? {
            Decoded::Clean(d) => assert_eq!(d, data),
            other => panic!("expected clean decode, got {other:?}"),
        }

        let mut corrupted = block;
        corrupted[4] ^= 0xFF;
        match rs.decode_shortened(&corrupted)? {
            Decoded::Corrected(d, 1) => assert_eq!(d, data),
            other => panic!("expected single correction, got {other:?}"),
        }
        Ok(())
    }
}
