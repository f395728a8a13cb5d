/*! FX.25 outer code.

FX.25 wraps a complete AX.25 frame (flags, bit stuffing and FCS
included) in a Reed-Solomon codeword, prefixed by a 64-bit correlation
tag that identifies the code. A receiver that does not know FX.25
still sees a valid AX.25 frame inside the data portion; a receiver
that does gets the parity octets to repair channel damage first.

The correlation tags and their (data, parity) geometries are fixed
constants from the published FX.25 specification. Tags travel least
significant octet first and are matched on a sliding 64-bit window.
 */
use std::collections::VecDeque;

use log::{debug, info};

use crate::rs::ReedSolomon;
use crate::{ax25, fcs, hdlc};
use crate::{Error, Result};

/// One published correlation tag: the 64-bit constant and the block
/// geometry it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationTag {
    pub tag: u64,
    /// Data octets per codeword.
    pub data_len: usize,
    /// Parity octets per codeword.
    pub parity_len: usize,
}

/// The published correlation tag table. Codes shorter than 255 octets
/// are shortened forms of the full-length code with the same parity
/// count.
pub const TAGS: [CorrelationTag; 11] = [
    CorrelationTag { tag: 0xB74DB7DF8A532F3E, data_len: 239, parity_len: 16 },
    CorrelationTag { tag: 0x26FF60A600CC8FDE, data_len: 128, parity_len: 16 },
    CorrelationTag { tag: 0xC7DC0508F3D9B09E, data_len: 64, parity_len: 16 },
    CorrelationTag { tag: 0x8F056EB4369660EE, data_len: 32, parity_len: 16 },
    CorrelationTag { tag: 0x6E260B1AC5835FAE, data_len: 223, parity_len: 32 },
    CorrelationTag { tag: 0xFF94DC634F1CFF4E, data_len: 128, parity_len: 32 },
    CorrelationTag { tag: 0x1EB7B9CDBC09C00E, data_len: 64, parity_len: 32 },
    CorrelationTag { tag: 0xDBF869BD2DBB1776, data_len: 32, parity_len: 32 },
    CorrelationTag { tag: 0x3ADB0C13DEAE2836, data_len: 191, parity_len: 64 },
    CorrelationTag { tag: 0xAB69DB6A543188D6, data_len: 128, parity_len: 64 },
    CorrelationTag { tag: 0x4A4ABEC4A724B796, data_len: 64, parity_len: 64 },
];

/// Look up a tag constant.
pub fn find_tag(tag: u64) -> Option<&'static CorrelationTag> {
    TAGS.iter().find(|t| t.tag == tag)
}

/// Requested FEC strength. Selects the parity count; the block size is
/// chosen per frame from the published table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fx25FecType {
    /// 16 parity octets, corrects 8 octet errors per codeword.
    #[default]
    Rs16,
    /// 32 parity octets.
    Rs32,
    /// 64 parity octets.
    Rs64,
}

impl Fx25FecType {
    fn parity(&self) -> usize {
        match self {
            Fx25FecType::Rs16 => 16,
            Fx25FecType::Rs32 => 32,
            Fx25FecType::Rs64 => 64,
        }
    }
}

/// FX.25 encoder.
pub struct Fx25Encoder {
    fec_type: Fx25FecType,
    add_checksum: bool,
    rs: ReedSolomon,
}

impl Fx25Encoder {
    /// Create an encoder.
    ///
    /// `interleaver_depth` is carried for configuration compatibility;
    /// only depth 1 (no interleaving) is a defined wire format.
    pub fn new(fec_type: Fx25FecType, interleaver_depth: u8, add_checksum: bool) -> Result<Self> {
        if interleaver_depth > 1 {
            return Err(Error::invalid(format!(
                "interleaver depth {interleaver_depth} has no defined wire format"
            )));
        }
        Ok(Self {
            fec_type,
            add_checksum,
            rs: ReedSolomon::new(crate::rs::CODE_LEN - fec_type.parity())?,
        })
    }

    /// Change the FEC strength.
    pub fn set_fec_type(&mut self, fec_type: Fx25FecType) -> Result<()> {
        self.fec_type = fec_type;
        self.rs = ReedSolomon::new(crate::rs::CODE_LEN - fec_type.parity())?;
        Ok(())
    }

    /// Pick the smallest published code of the configured parity that
    /// fits `len` data octets, falling back to the full-length code.
    fn pick_tag(&self, len: usize) -> &'static CorrelationTag {
        let parity = self.fec_type.parity();
        TAGS.iter()
            .filter(|t| t.parity_len == parity)
            .filter(|t| t.data_len >= len)
            .min_by_key(|t| t.data_len)
            .unwrap_or_else(|| {
                TAGS.iter()
                    .filter(|t| t.parity_len == parity)
                    .max_by_key(|t| t.data_len)
                    .unwrap()
            })
    }

    /// Wrap an assembled AX.25 frame (FCS included, no flags).
    ///
    /// The frame is flagged and bit stuffed, padded to the block size
    /// with flag octets, and Reed-Solomon encoded. Output is the
    /// correlation tag followed by the codeword octets.
    pub fn encode_frame(&self, frame: &ax25::Frame) -> Result<Vec<u8>> {
        self.encode_raw(&frame.assemble()?)
    }

    /// Same, starting from already assembled frame octets.
    pub fn encode_raw(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let wire = hdlc::frame_bytes(frame);
        let entry = self.pick_tag(wire.len());

        let mut out = Vec::new();
        out.extend_from_slice(&entry.tag.to_le_bytes());
        for chunk in wire.chunks(entry.data_len) {
            let mut block = chunk.to_vec();
            // Flag fill up to the block size; a plain AX.25 receiver
            // sees idle flags.
            block.resize(entry.data_len, hdlc::FLAG);
            let codeword = if entry.data_len == self.rs.data_len() {
                self.rs.encode(&block)?
            } else {
                self.rs.encode_shortened(&block)?
            };
            out.extend_from_slice(&codeword);
        }
        if self.add_checksum {
            let crc = fcs::fcs(&out);
            out.extend_from_slice(&crc.to_le_bytes());
        }
        Ok(out)
    }
}

enum DecodeState {
    /// Sliding 64-bit window over the incoming octet stream.
    Hunting(u64),
    /// Tag matched; accumulating codeword octets.
    Blocks { entry: &'static CorrelationTag, buf: Vec<u8> },
    /// Frame complete; trailing stream checksum octets expected.
    Checksum { pending: Vec<ax25::Frame>, buf: Vec<u8> },
}

/// Streaming FX.25 decoder.
///
/// Feed received octets in; complete AX.25 frames come out. Anything
/// that is not a recognized correlation tag is skipped; uncorrectable
/// codewords resynchronize the hunt and are counted.
pub struct Fx25Decoder {
    state: DecodeState,
    add_checksum: bool,
    deframer: hdlc::Deframer,
    /// Octets covered by the optional stream checksum.
    covered: Vec<u8>,
    frames: VecDeque<ax25::Frame>,
    corrected: u64,
    uncorrectable: u64,
}

impl Fx25Decoder {
    pub fn new(add_checksum: bool) -> Self {
        Self {
            state: DecodeState::Hunting(0),
            add_checksum,
            deframer: hdlc::Deframer::new(17, ax25::MAX_ADDRS * 7 + ax25::MAX_INFO + 4).keep_fcs(),
            covered: Vec::new(),
            frames: VecDeque::new(),
            corrected: 0,
            uncorrectable: 0,
        }
    }

    /// Codewords dropped as uncorrectable so far.
    pub fn uncorrectable(&self) -> u64 {
        self.uncorrectable
    }

    /// Symbol errors repaired so far.
    pub fn corrected(&self) -> u64 {
        self.corrected
    }

    /// Next decoded frame, if any.
    pub fn pop(&mut self) -> Option<ax25::Frame> {
        self.frames.pop_front()
    }

    /// Feed received octets.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push_byte(b);
        }
    }

    /// Feed one received octet.
    pub fn push_byte(&mut self, byte: u8) {
        let state = std::mem::replace(&mut self.state, DecodeState::Hunting(0));
        self.state = match state {
            DecodeState::Hunting(acc) => {
                let acc = (acc >> 8) | (byte as u64) << 56;
                match find_tag(acc) {
                    Some(entry) => {
                        debug!("Fx25Decoder: tag for RS({},{}) found",
                            entry.data_len + entry.parity_len, entry.data_len);
                        self.covered.clear();
                        self.covered.extend_from_slice(&acc.to_le_bytes());
                        self.deframer =
                            hdlc::Deframer::new(17, ax25::MAX_ADDRS * 7 + ax25::MAX_INFO + 4).keep_fcs();
                        DecodeState::Blocks { entry, buf: Vec::new() }
                    }
                    None => DecodeState::Hunting(acc),
                }
            }
            DecodeState::Blocks { entry, mut buf } => {
                buf.push(byte);
                if buf.len() < entry.data_len + entry.parity_len {
                    DecodeState::Blocks { entry, buf }
                } else {
                    match self.decode_block(entry, &buf) {
                        Ok(frames) if frames.is_empty() => {
                            // No complete frame yet; the next codeword
                            // continues it.
                            DecodeState::Blocks { entry, buf: Vec::new() }
                        }
                        Ok(frames) => {
                            if self.add_checksum {
                                DecodeState::Checksum { pending: frames, buf: Vec::new() }
                            } else {
                                self.frames.extend(frames);
                                DecodeState::Hunting(0)
                            }
                        }
                        Err(_) => {
                            self.uncorrectable += 1;
                            DecodeState::Hunting(0)
                        }
                    }
                }
            }
            DecodeState::Checksum { pending, mut buf } => {
                buf.push(byte);
                if buf.len() < 2 {
                    DecodeState::Checksum { pending, buf }
                } else {
                    let got = u16::from_le_bytes([buf[0], buf[1]]);
                    if got == fcs::fcs(&self.covered) {
                        self.frames.extend(pending);
                    } else {
                        debug!("Fx25Decoder: stream checksum mismatch");
                        self.uncorrectable += 1;
                    }
                    DecodeState::Hunting(0)
                }
            }
        };
    }

    fn decode_block(&mut self, entry: &CorrelationTag, buf: &[u8]) -> Result<Vec<ax25::Frame>> {
        let rs = ReedSolomon::new(crate::rs::CODE_LEN - entry.parity_len)?;
        let decoded = if buf.len() == crate::rs::CODE_LEN {
            rs.decode(buf)?
        } else {
            rs.decode_shortened(buf)?
        };
        if let crate::rs::Decoded::Corrected(_, n) = &decoded {
            debug!("Fx25Decoder: corrected {n} octet errors");
            self.corrected += *n as u64;
        }
        let data = decoded.into_data()?;
        // The stream checksum covers the repaired codeword, so
        // re-derive it from the corrected data.
        if self.add_checksum {
            let clean = if buf.len() == crate::rs::CODE_LEN {
                rs.encode(&data)?
            } else {
                rs.encode_shortened(&data)?
            };
            self.covered.extend_from_slice(&clean);
        }
        self.deframer.push_bits(&hdlc::bytes_to_bits(&data));
        let mut frames = Vec::new();
        while let Some(raw) = self.deframer.pop() {
            match ax25::Frame::parse(&raw) {
                Ok(frame) => {
                    info!("Fx25Decoder: frame {} > {}", frame.src(), frame.dest());
                    frames.push(frame);
                }
                Err(e) => debug!("Fx25Decoder: inner frame rejected: {e}"),
            }
        }
        Ok(frames)
    }
}
