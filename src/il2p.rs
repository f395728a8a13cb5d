/*! IL2P framing.

IL2P (Improved Layer 2 Protocol) replaces HDLC framing entirely: no
flags, no bit stuffing. A transmission is a 24-bit sync word, a 13
octet header protected by two Reed-Solomon parity octets, then the
payload striped into Reed-Solomon blocks. Everything but the parity is
run through a multiplicative scrambler so the channel sees enough bit
transitions to keep clock recovery alive.

The constants here (the sync word, the scrambler polynomial and seed,
and the header bit layout) come from the published IL2P specification.
The header packs the callsigns as 6-bit characters in the low bits of
octets 0-11 and threads the control information through the top two
bits of those same octets.
 */
use std::collections::VecDeque;

use log::{debug, info};

use crate::ax25::Address;
use crate::rs::ReedSolomon;
use crate::{Error, Result};

/// 24-bit frame sync word, transmitted most significant octet first.
pub const SYNC_WORD: [u8; 3] = [0xF1, 0x5E, 0x48];

/// Header length before parity.
pub const HEADER_LEN: usize = 13;

/// Reed-Solomon parity octets protecting the header.
pub const HEADER_PARITY: usize = 2;

/// Largest payload one frame can describe (10-bit length field).
pub const MAX_PAYLOAD: usize = 1023;

/// IL2P scrambler: 9-bit multiplicative LFSR, taps 0x108, seed 0x1F0.
///
/// The transmit side feeds back its own output; the receive side feeds
/// forward the received bit, so the pair is self-synchronizing.
struct Lfsr {
    mask: u64,
    shift_reg: u64,
}

impl Lfsr {
    fn il2p() -> Self {
        Self {
            mask: 0x108,
            shift_reg: 0x1F0,
        }
    }

    fn next_scramble(&mut self, bit: u8) -> u8 {
        debug_assert!(bit <= 1);
        let out = 1 & (bit ^ self.shift_reg as u8);
        self.shift_reg = (self.shift_reg >> 1) ^ (self.mask * out as u64);
        out
    }

    fn next_descramble(&mut self, bit: u8) -> u8 {
        debug_assert!(bit <= 1);
        let out = 1 & (bit ^ self.shift_reg as u8);
        self.shift_reg = (self.shift_reg >> 1) ^ (self.mask * (bit & 1) as u64);
        out
    }
}

fn apply_lfsr(data: &[u8], scramble: bool) -> Vec<u8> {
    let mut lfsr = Lfsr::il2p();
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        let mut o = 0u8;
        // MSB first within each octet.
        for i in (0..8).rev() {
            let bit = (byte >> i) & 1;
            let b = if scramble {
                lfsr.next_scramble(bit)
            } else {
                lfsr.next_descramble(bit)
            };
            o |= b << i;
        }
        out.push(o);
    }
    out
}

/// Scramble a block. The LFSR is seeded fresh per block.
pub fn scramble(data: &[u8]) -> Vec<u8> {
    apply_lfsr(data, true)
}

/// Descramble a block.
pub fn descramble(data: &[u8]) -> Vec<u8> {
    apply_lfsr(data, false)
}

/// Payload FEC profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Il2pFecType {
    /// RS(255,223): 32 parity octets per block.
    #[default]
    Rs255_223,
    /// RS(255,239): 16 parity octets per block.
    Rs255_239,
    /// RS(255,247): 8 parity octets per block.
    Rs255_247,
}

impl Il2pFecType {
    /// Data octets per payload block.
    pub fn data_len(&self) -> usize {
        match self {
            Il2pFecType::Rs255_223 => 223,
            Il2pFecType::Rs255_239 => 239,
            Il2pFecType::Rs255_247 => 247,
        }
    }

    /// Parity octets per payload block.
    pub fn parity_len(&self) -> usize {
        crate::rs::CODE_LEN - self.data_len()
    }
}

/// Decoded IL2P header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Il2pHeader {
    pub dest: Address,
    pub src: Address,
    /// UI frame flag.
    pub ui: bool,
    /// PID, 4 bits.
    pub pid: u8,
    /// Control field, 7 bits.
    pub control: u8,
    /// Type 1 headers carry full AX.25 addressing.
    pub header_type1: bool,
    /// Maximum FEC flag from the transmitting station.
    pub max_fec: bool,
    /// Payload octets following the header block, 10 bits.
    pub payload_len: u16,
}

fn encode_callsign(call: &str) -> Result<[u8; 6]> {
    if call.is_empty() || call.len() > 6 {
        return Err(Error::invalid(format!("bad callsign {call:?}")));
    }
    let mut out = [0u8; 6];
    for (i, ch) in call.bytes().enumerate() {
        let ch = ch.to_ascii_uppercase();
        if !(0x20..0x60).contains(&ch) {
            return Err(Error::invalid(format!("callsign character {ch:#04x}")));
        }
        out[i] = (ch - 0x20) & 0x3F;
    }
    Ok(out)
}

fn decode_callsign(data: &[u8]) -> String {
    data.iter()
        .map(|b| b & 0x3F)
        .filter(|&b| b != 0)
        .map(|b| (b + 0x20) as char)
        .collect()
}

impl Il2pHeader {
    /// Pack into the 13 octet wire layout.
    pub fn encode(&self) -> Result<[u8; 13]> {
        if self.pid > 0x0F {
            return Err(Error::invalid(format!("PID {:#04x} over 4 bits", self.pid)));
        }
        if self.control > 0x7F {
            return Err(Error::invalid(format!("control {:#04x} over 7 bits", self.control)));
        }
        if self.payload_len as usize > MAX_PAYLOAD {
            return Err(Error::invalid(format!("payload of {} octets", self.payload_len)));
        }
        if self.dest.ssid > 15 || self.src.ssid > 15 {
            return Err(Error::invalid("SSID over 4 bits"));
        }
        let mut out = [0u8; 13];
        out[..6].copy_from_slice(&encode_callsign(&self.dest.call)?);
        out[6..12].copy_from_slice(&encode_callsign(&self.src.call)?);
        out[12] = (self.dest.ssid << 4) | (self.src.ssid & 0x0F);

        if self.max_fec {
            out[0] |= 0x80;
        }
        if self.ui {
            out[0] |= 0x40;
        }
        if self.header_type1 {
            out[1] |= 0x80;
        }
        // PID rides the 0x40 bits of octets 1-4, MSB first.
        for i in 0..4 {
            if self.pid & (1 << (3 - i)) != 0 {
                out[1 + i] |= 0x40;
            }
        }
        // Control rides the 0x40 bits of octets 5-11.
        for i in 0..7 {
            if self.control & (1 << (6 - i)) != 0 {
                out[5 + i] |= 0x40;
            }
        }
        // Payload length rides the 0x80 bits of octets 2-11.
        for i in 0..10 {
            if self.payload_len & (1 << (9 - i)) != 0 {
                out[2 + i] |= 0x80;
            }
        }
        Ok(out)
    }

    /// Unpack from the 13 octet wire layout.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != HEADER_LEN {
            return Err(Error::malformed(format!("IL2P header of {} octets", data.len())));
        }
        let dest_call = decode_callsign(&data[0..6]);
        let src_call = decode_callsign(&data[6..12]);
        if dest_call.is_empty() || src_call.is_empty() {
            return Err(Error::malformed("empty IL2P callsign"));
        }
        let mut pid = 0u8;
        for i in 0..4 {
            if data[1 + i] & 0x40 != 0 {
                pid |= 1 << (3 - i);
            }
        }
        let mut control = 0u8;
        for i in 0..7 {
            if data[5 + i] & 0x40 != 0 {
                control |= 1 << (6 - i);
            }
        }
        let mut payload_len = 0u16;
        for i in 0..10 {
            if data[2 + i] & 0x80 != 0 {
                payload_len |= 1 << (9 - i);
            }
        }
        Ok(Self {
            dest: Address {
                call: dest_call,
                ssid: data[12] >> 4,
                c: false,
            },
            src: Address {
                call: src_call,
                ssid: data[12] & 0x0F,
                c: false,
            },
            ui: data[0] & 0x40 != 0,
            pid,
            control,
            header_type1: data[1] & 0x80 != 0,
            max_fec: data[0] & 0x80 != 0,
            payload_len,
        })
    }
}

// CRC-32 (reflected 0xEDB88320) for the optional trailing checksum.
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
        }
    }
    crc ^ 0xFFFF_FFFF
}

/// IL2P frame encoder.
pub struct Il2pEncoder {
    src: Address,
    dest: Address,
    fec_type: Il2pFecType,
    add_checksum: bool,
    header_rs: ReedSolomon,
    payload_rs: ReedSolomon,
}

impl Il2pEncoder {
    pub fn new(src: Address, dest: Address, fec_type: Il2pFecType, add_checksum: bool) -> Result<Self> {
        Ok(Self {
            src,
            dest,
            fec_type,
            add_checksum,
            header_rs: ReedSolomon::new(crate::rs::CODE_LEN - HEADER_PARITY)?,
            payload_rs: ReedSolomon::new(fec_type.data_len())?,
        })
    }

    /// Change the payload FEC profile.
    pub fn set_fec_type(&mut self, fec_type: Il2pFecType) -> Result<()> {
        self.fec_type = fec_type;
        self.payload_rs = ReedSolomon::new(fec_type.data_len())?;
        Ok(())
    }

    /// Encode a UI frame.
    pub fn encode_ui(&self, pid: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.encode_frame(true, pid, 0, payload)
    }

    /// Encode a frame: sync word, protected header, striped payload.
    pub fn encode_frame(&self, ui: bool, pid: u8, control: u8, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::invalid(format!("payload of {} octets", payload.len())));
        }
        let header = Il2pHeader {
            dest: self.dest.clone(),
            src: self.src.clone(),
            ui,
            pid,
            control,
            header_type1: true,
            max_fec: self.fec_type == Il2pFecType::Rs255_223,
            payload_len: payload.len() as u16,
        };

        let mut out = Vec::with_capacity(3 + HEADER_LEN + HEADER_PARITY + payload.len() + 64);
        out.extend_from_slice(&SYNC_WORD);

        // Header: scramble, then parity over the scrambled octets.
        let scrambled = scramble(&header.encode()?);
        out.extend_from_slice(&self.header_rs.encode_shortened(&scrambled)?);

        // Payload stripes, each scrambled and extended with parity.
        for chunk in payload.chunks(self.fec_type.data_len()) {
            let scrambled = scramble(chunk);
            out.extend_from_slice(&self.payload_rs.encode_shortened(&scrambled)?);
        }

        if self.add_checksum {
            out.extend_from_slice(&crc32(payload).to_le_bytes());
        }
        Ok(out)
    }
}

/// The stripe sizes a payload of `len` octets is split into.
fn block_plan(len: usize, fec_type: Il2pFecType) -> Vec<usize> {
    let k = fec_type.data_len();
    let mut plan = vec![k; len / k];
    if len % k != 0 {
        plan.push(len % k);
    }
    plan
}

enum DecodeState {
    /// Sliding 24-bit window looking for the sync word.
    Hunt(u32),
    /// Accumulating the 15 octet header block.
    Header(Vec<u8>),
    /// Accumulating payload stripes.
    Payload {
        header: Il2pHeader,
        plan: Vec<usize>,
        block: Vec<u8>,
        collected: Vec<u8>,
    },
    /// Accumulating the four trailing checksum octets.
    Checksum { header: Il2pHeader, payload: Vec<u8>, buf: Vec<u8> },
}

/// Streaming IL2P decoder.
///
/// The header block must decode before any payload octet is
/// interpreted; a header failure discards the frame and resumes the
/// sync hunt.
pub struct Il2pDecoder {
    state: DecodeState,
    fec_type: Il2pFecType,
    add_checksum: bool,
    header_rs: ReedSolomon,
    payload_rs: ReedSolomon,
    frames: VecDeque<(Il2pHeader, Vec<u8>)>,
    decoded: u64,
    dropped: u64,
}

impl Il2pDecoder {
    pub fn new(fec_type: Il2pFecType, add_checksum: bool) -> Result<Self> {
        Ok(Self {
            state: DecodeState::Hunt(0),
            fec_type,
            add_checksum,
            header_rs: ReedSolomon::new(crate::rs::CODE_LEN - HEADER_PARITY)?,
            payload_rs: ReedSolomon::new(fec_type.data_len())?,
            frames: VecDeque::new(),
            decoded: 0,
            dropped: 0,
        })
    }

    /// Frames decoded so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Frames dropped on header or payload FEC failure.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next decoded frame.
    pub fn pop(&mut self) -> Option<(Il2pHeader, Vec<u8>)> {
        self.frames.pop_front()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push_byte(b);
        }
    }

    pub fn push_byte(&mut self, byte: u8) {
        let state = std::mem::replace(&mut self.state, DecodeState::Hunt(0));
        self.state = match state {
            DecodeState::Hunt(acc) => {
                let acc = ((acc << 8) | byte as u32) & 0x00FF_FFFF;
                let want = u32::from_be_bytes([0, SYNC_WORD[0], SYNC_WORD[1], SYNC_WORD[2]]);
                if acc == want {
                    debug!("Il2pDecoder: sync word found");
                    DecodeState::Header(Vec::with_capacity(HEADER_LEN + HEADER_PARITY))
                } else {
                    DecodeState::Hunt(acc)
                }
            }
            DecodeState::Header(mut buf) => {
                buf.push(byte);
                if buf.len() < HEADER_LEN + HEADER_PARITY {
                    DecodeState::Header(buf)
                } else {
                    match self.decode_header(&buf) {
                        Ok(header) => {
                            info!(
                                "Il2pDecoder: header {} > {}, {} payload octets",
                                header.src, header.dest, header.payload_len
                            );
                            self.advance_with_header(header)
                        }
                        Err(e) => {
                            debug!("Il2pDecoder: header discarded: {e}");
                            self.dropped += 1;
                            DecodeState::Hunt(0)
                        }
                    }
                }
            }
            DecodeState::Payload {
                header,
                mut plan,
                mut block,
                mut collected,
            } => {
                block.push(byte);
                let want = plan[0] + self.fec_type.parity_len();
                if block.len() < want {
                    DecodeState::Payload { header, plan, block, collected }
                } else {
                    match self.decode_stripe(&block) {
                        Ok(data) => {
                            collected.extend_from_slice(&data);
                            plan.remove(0);
                            if plan.is_empty() {
                                self.finish(header, collected)
                            } else {
                                DecodeState::Payload { header, plan, block: Vec::new(), collected }
                            }
                        }
                        Err(e) => {
                            debug!("Il2pDecoder: payload stripe discarded: {e}");
                            self.dropped += 1;
                            DecodeState::Hunt(0)
                        }
                    }
                }
            }
            DecodeState::Checksum { header, payload, mut buf } => {
                buf.push(byte);
                if buf.len() < 4 {
                    DecodeState::Checksum { header, payload, buf }
                } else {
                    let got = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                    if got == crc32(&payload) {
                        self.decoded += 1;
                        self.frames.push_back((header, payload));
                    } else {
                        debug!("Il2pDecoder: trailing checksum mismatch");
                        self.dropped += 1;
                    }
                    DecodeState::Hunt(0)
                }
            }
        };
    }

    fn advance_with_header(&mut self, header: Il2pHeader) -> DecodeState {
        if header.payload_len == 0 {
            self.finish(header, Vec::new())
        } else {
            let plan = block_plan(header.payload_len as usize, self.fec_type);
            DecodeState::Payload {
                header,
                plan,
                block: Vec::new(),
                collected: Vec::new(),
            }
        }
    }

    fn finish(&mut self, header: Il2pHeader, payload: Vec<u8>) -> DecodeState {
        if self.add_checksum {
            DecodeState::Checksum { header, payload, buf: Vec::new() }
        } else {
            self.decoded += 1;
            self.frames.push_back((header, payload));
            DecodeState::Hunt(0)
        }
    }

    fn decode_header(&self, block: &[u8]) -> Result<Il2pHeader> {
        let scrambled = self.header_rs.decode_shortened(block)?.into_data()?;
        Il2pHeader::parse(&descramble(&scrambled))
    }

    fn decode_stripe(&self, block: &[u8]) -> Result<Vec<u8>> {
        let scrambled = self.payload_rs.decode_shortened(block)?.into_data()?;
        Ok(descramble(&scrambled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(call: &str, ssid: u8) -> Address {
        Address::new(call, ssid).unwrap()
    }

    #[test]
    fn scrambler_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let scrambled = scramble(data);
        assert_ne!(&scrambled[..], &data[..]);
        assert_eq!(descramble(&scrambled), data);
    }

    #[test]
    fn scrambler_breaks_constant_runs() {
        // A run of zero octets must come out with transitions in it.
        let scrambled = scramble(&[0u8; 16]);
        assert!(scrambled.iter().any(|&b| b != 0));
        assert!(scrambled.iter().any(|&b| b != 0xFF));
    }

    #[test]
    fn scrambler_roundtrip_random() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..20 {
            let data: Vec<u8> = (0..200).map(|_| rng.random_range(0..=255)).collect();
            assert_eq!(descramble(&scramble(&data)), data);
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = Il2pHeader {
            dest: addr("N0CALL", 4),
            src: addr("W1AW", 11),
            ui: true,
            pid: 0x0B,
            control: 0x5A,
            header_type1: true,
            max_fec: false,
            payload_len: 731,
        };
        let wire = header.encode().unwrap();
        assert_eq!(Il2pHeader::parse(&wire).unwrap(), header);
    }

    #[test]
    fn header_field_limits() {
        let mut header = Il2pHeader {
            dest: addr("A", 0),
            src: addr("B", 0),
            ui: false,
            pid: 0,
            control: 0,
            header_type1: true,
            max_fec: false,
            payload_len: 0,
        };
        header.payload_len = 1023;
        assert!(header.encode().is_ok());
        header.payload_len = 1024;
        assert!(header.encode().is_err());
        header.payload_len = 0;
        header.pid = 16;
        assert!(header.encode().is_err());
        header.pid = 0;
        header.control = 0x80;
        assert!(header.encode().is_err());
    }

    #[test]
    fn frame_roundtrip() -> anyhow::Result<()> {
        let enc = Il2pEncoder::new(addr("W1AW", 1), addr("N0CALL", 2), Il2pFecType::Rs255_239, false)?;
        let payload = b"IL2P carries this without flags or stuffing";
        let wire = enc.encode_ui(0x0B, payload)?;
        assert_eq!(&wire[..3], &SYNC_WORD);

        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_239, false)?;
        dec.push_bytes(&wire);
        let (header, got) = dec.pop().expect("frame decoded");
        assert_eq!(got, payload);
        assert_eq!(header.src, addr("W1AW", 1));
        assert_eq!(header.dest, addr("N0CALL", 2));
        assert!(header.ui);
        assert_eq!(header.pid, 0x0B);
        assert_eq!(header.payload_len as usize, payload.len());
        Ok(())
    }

    #[test]
    fn empty_payload_frame() -> anyhow::Result<()> {
        let enc = Il2pEncoder::new(addr("A", 0), addr("B", 0), Il2pFecType::Rs255_247, false)?;
        let wire = enc.encode_frame(false, 1, 0x2F, &[])?;
        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_247, false)?;
        dec.push_bytes(&wire);
        let (header, payload) = dec.pop().expect("frame decoded");
        assert!(payload.is_empty());
        assert_eq!(header.control, 0x2F);
        Ok(())
    }

    #[test]
    fn multi_stripe_payload() -> anyhow::Result<()> {
        let enc = Il2pEncoder::new(addr("A", 0), addr("B", 0), Il2pFecType::Rs255_223, false)?;
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        let wire = enc.encode_ui(0, &payload)?;
        // 600 octets stripe as 223 + 223 + 154, each plus 32 parity.
        assert_eq!(wire.len(), 3 + 15 + 600 + 3 * 32);

        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_223, false)?;
        dec.push_bytes(&wire);
        let (_, got) = dec.pop().expect("frame decoded");
        assert_eq!(got, payload);
        Ok(())
    }

    #[test]
    fn corrects_payload_errors() -> anyhow::Result<()> {
        let enc = Il2pEncoder::new(addr("A", 0), addr("B", 0), Il2pFecType::Rs255_239, false)?;
        let payload: Vec<u8> = (0..100).map(|i| i as u8).collect();
        let mut wire = enc.encode_ui(0, &payload)?;
        // Corrupt octets inside the payload stripe; t = 8.
        let base = 3 + 15;
        for i in 0..8 {
            wire[base + 3 + i * 9] ^= 0x3C;
        }
        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_239, false)?;
        dec.push_bytes(&wire);
        let (_, got) = dec.pop().expect("frame decoded");
        assert_eq!(got, payload);
        Ok(())
    }

    #[test]
    fn header_failure_discards_frame() -> anyhow::Result<()> {
        let enc = Il2pEncoder::new(addr("A", 0), addr("B", 0), Il2pFecType::Rs255_239, false)?;
        let mut wire = enc.encode_ui(0, b"unreachable payload")?;
        // Two parity octets correct one error; trash five header
        // octets.
        for i in [4usize, 6, 9, 12, 15] {
            wire[i] ^= 0xFF;
        }
        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_239, false)?;
        dec.push_bytes(&wire);
        assert_eq!(dec.pop(), None);
        assert_eq!(dec.dropped(), 1);
        Ok(())
    }

    #[test]
    fn sync_hunt_skips_noise() -> anyhow::Result<()> {
        let enc = Il2pEncoder::new(addr("A", 0), addr("B", 0), Il2pFecType::Rs255_239, false)?;
        let wire = enc.encode_ui(0, b"found it")?;
        let mut stream = vec![0x00u8, 0xF1, 0x5E, 0x00, 0xAB];
        stream.extend_from_slice(&wire);
        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_239, false)?;
        dec.push_bytes(&stream);
        let (_, got) = dec.pop().expect("frame decoded");
        assert_eq!(got, b"found it");
        Ok(())
    }

    #[test]
    fn trailing_checksum() -> anyhow::Result<()> {
        let enc = Il2pEncoder::new(addr("A", 0), addr("B", 0), Il2pFecType::Rs255_239, true)?;
        let wire = enc.encode_ui(0, b"checked")?;

        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_239, true)?;
        dec.push_bytes(&wire);
        assert!(dec.pop().is_some());

        let mut bad = wire.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let mut dec = Il2pDecoder::new(Il2pFecType::Rs255_239, true)?;
        dec.push_bytes(&bad);
        assert_eq!(dec.pop(), None);
        assert_eq!(dec.dropped(), 1);
        Ok(())
    }
}
