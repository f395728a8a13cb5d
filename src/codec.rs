/*! Byte-level codec blocks.

The three framers look the same from the outside: octets of user
payload go in one side, wire octets come out the other (or the
reverse). That shared surface is the [`ByteCodec`] trait (consume,
produce, configure), and the concrete encoder/decoder blocks form the
closed [`FrameCodec`] family. There is deliberately no inheritance
style hierarchy here; a host that owns a `FrameCodec` can swap the
wire format under a connection without caring which one it is.
 */
use std::collections::VecDeque;

use log::debug;

use crate::ax25::{self, Address, Frame};
use crate::{fx25, hdlc, il2p};
use crate::{Error, Result};

/// Runtime-settable codec parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CodecParam {
    /// FX.25 FEC strength.
    Fx25Fec(fx25::Fx25FecType),
    /// IL2P payload FEC profile.
    Il2pFec(il2p::Il2pFecType),
}

/// The capability surface shared by all framer blocks.
pub trait ByteCodec {
    /// Feed octets into the block.
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    /// Take the next finished unit of output octets, if any.
    fn produce_bytes(&mut self) -> Option<Vec<u8>>;
    /// Adjust a runtime parameter.
    fn configure(&mut self, param: CodecParam) -> Result<()>;
}

/// Addressing and flags shared by the encoder blocks.
#[derive(Debug, Clone)]
pub struct Ax25Config {
    pub dest: Address,
    pub src: Address,
    pub digipeaters: Vec<Address>,
    /// Send as a command frame (C bits set accordingly).
    pub command: bool,
    /// Poll/final bit on emitted frames.
    pub poll: bool,
    pub pid: u8,
}

impl Ax25Config {
    pub fn new(dest: Address, src: Address) -> Self {
        Self {
            dest,
            src,
            digipeaters: Vec::new(),
            command: true,
            poll: false,
            pid: ax25::PID_NO_LAYER3,
        }
    }

    /// Build one UI frame around a payload chunk.
    fn ui_frame(&self, chunk: &[u8]) -> Result<Frame> {
        let mut frame = Frame::ui(
            Address { c: self.command, ..self.dest.clone() },
            Address { c: !self.command, ..self.src.clone() },
            self.pid,
            chunk.to_vec(),
        );
        frame.control = ax25::Control::Ui { pf: self.poll };
        for digi in &self.digipeaters {
            frame.add_digipeater(digi.clone())?;
        }
        Ok(frame)
    }
}

/// Payload in, HDLC-framed AX.25 UI frames out.
pub struct Ax25Encode {
    config: Ax25Config,
    out: VecDeque<Vec<u8>>,
}

impl Ax25Encode {
    pub fn new(config: Ax25Config) -> Self {
        Self { config, out: VecDeque::new() }
    }
}

impl ByteCodec for Ax25Encode {
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks(ax25::MAX_INFO) {
            let wire = self.config.ui_frame(chunk)?.assemble()?;
            self.out.push_back(hdlc::frame_bytes(&wire));
        }
        Ok(())
    }

    fn produce_bytes(&mut self) -> Option<Vec<u8>> {
        self.out.pop_front()
    }

    fn configure(&mut self, param: CodecParam) -> Result<()> {
        Err(Error::invalid(format!("{param:?} does not apply to AX.25")))
    }
}

/// HDLC octet stream in, UI payloads out.
pub struct Ax25Decode {
    deframer: hdlc::Deframer,
    frames: VecDeque<Frame>,
}

impl Ax25Decode {
    pub fn new() -> Self {
        Self {
            deframer: hdlc::Deframer::new(17, ax25::MAX_ADDRS * 7 + ax25::MAX_INFO + 4).keep_fcs(),
            frames: VecDeque::new(),
        }
    }

    /// Next parsed frame, addressing and all.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    fn drain_deframer(&mut self) {
        while let Some(raw) = self.deframer.pop() {
            match Frame::parse(&raw) {
                Ok(frame) => self.frames.push_back(frame),
                Err(e) => debug!("Ax25Decode: frame rejected: {e}"),
            }
        }
    }
}

impl Default for Ax25Decode {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteCodec for Ax25Decode {
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.deframer.push_bits(&hdlc::bytes_to_bits(bytes));
        self.drain_deframer();
        Ok(())
    }

    fn produce_bytes(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front().map(|f| f.info)
    }

    fn configure(&mut self, param: CodecParam) -> Result<()> {
        Err(Error::invalid(format!("{param:?} does not apply to AX.25")))
    }
}

/// Payload in, correlation-tagged FX.25 transmissions out.
pub struct Fx25Encode {
    config: Ax25Config,
    inner: fx25::Fx25Encoder,
    out: VecDeque<Vec<u8>>,
}

impl Fx25Encode {
    pub fn new(config: Ax25Config, fec_type: fx25::Fx25FecType) -> Result<Self> {
        Ok(Self {
            config,
            inner: fx25::Fx25Encoder::new(fec_type, 1, false)?,
            out: VecDeque::new(),
        })
    }
}

impl ByteCodec for Fx25Encode {
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks(ax25::MAX_INFO) {
            let frame = self.config.ui_frame(chunk)?;
            self.out.push_back(self.inner.encode_frame(&frame)?);
        }
        Ok(())
    }

    fn produce_bytes(&mut self) -> Option<Vec<u8>> {
        self.out.pop_front()
    }

    fn configure(&mut self, param: CodecParam) -> Result<()> {
        match param {
            CodecParam::Fx25Fec(fec) => self.inner.set_fec_type(fec),
            other => Err(Error::invalid(format!("{other:?} does not apply to FX.25"))),
        }
    }
}

/// FX.25 octet stream in, UI payloads out.
pub struct Fx25Decode {
    inner: fx25::Fx25Decoder,
}

impl Fx25Decode {
    pub fn new() -> Self {
        Self { inner: fx25::Fx25Decoder::new(false) }
    }

    /// Next parsed frame.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.inner.pop()
    }
}

impl Default for Fx25Decode {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteCodec for Fx25Decode {
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.push_bytes(bytes);
        Ok(())
    }

    fn produce_bytes(&mut self) -> Option<Vec<u8>> {
        self.inner.pop().map(|f| f.info)
    }

    fn configure(&mut self, param: CodecParam) -> Result<()> {
        match param {
            // The decoder recognizes every published tag; FEC strength
            // is a transmit-side choice.
            CodecParam::Fx25Fec(_) => Ok(()),
            other => Err(Error::invalid(format!("{other:?} does not apply to FX.25"))),
        }
    }
}

/// Payload in, IL2P transmissions out.
pub struct Il2pEncode {
    inner: il2p::Il2pEncoder,
    pid: u8,
    out: VecDeque<Vec<u8>>,
}

impl Il2pEncode {
    pub fn new(src: Address, dest: Address, fec_type: il2p::Il2pFecType) -> Result<Self> {
        Ok(Self {
            inner: il2p::Il2pEncoder::new(src, dest, fec_type, false)?,
            pid: 0x0B,
            out: VecDeque::new(),
        })
    }
}

impl ByteCodec for Il2pEncode {
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks(il2p::MAX_PAYLOAD) {
            self.out.push_back(self.inner.encode_ui(self.pid, chunk)?);
        }
        Ok(())
    }

    fn produce_bytes(&mut self) -> Option<Vec<u8>> {
        self.out.pop_front()
    }

    fn configure(&mut self, param: CodecParam) -> Result<()> {
        match param {
            CodecParam::Il2pFec(fec) => self.inner.set_fec_type(fec),
            other => Err(Error::invalid(format!("{other:?} does not apply to IL2P"))),
        }
    }
}

/// IL2P octet stream in, payloads out.
pub struct Il2pDecode {
    inner: il2p::Il2pDecoder,
}

impl Il2pDecode {
    pub fn new(fec_type: il2p::Il2pFecType) -> Result<Self> {
        Ok(Self {
            inner: il2p::Il2pDecoder::new(fec_type, false)?,
        })
    }

    /// Next decoded header/payload pair.
    pub fn pop_frame(&mut self) -> Option<(il2p::Il2pHeader, Vec<u8>)> {
        self.inner.pop()
    }
}

impl ByteCodec for Il2pDecode {
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.push_bytes(bytes);
        Ok(())
    }

    fn produce_bytes(&mut self) -> Option<Vec<u8>> {
        self.inner.pop().map(|(_, payload)| payload)
    }

    fn configure(&mut self, param: CodecParam) -> Result<()> {
        match param {
            CodecParam::Il2pFec(fec) => {
                self.inner = il2p::Il2pDecoder::new(fec, false)?;
                Ok(())
            }
            other => Err(Error::invalid(format!("{other:?} does not apply to IL2P"))),
        }
    }
}

/// The closed family of framer blocks.
pub enum FrameCodec {
    Ax25Encode(Ax25Encode),
    Ax25Decode(Ax25Decode),
    Fx25Encode(Fx25Encode),
    Fx25Decode(Fx25Decode),
    Il2pEncode(Il2pEncode),
    Il2pDecode(Il2pDecode),
}

impl ByteCodec for FrameCodec {
    fn consume_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            FrameCodec::Ax25Encode(c) => c.consume_bytes(bytes),
            FrameCodec::Ax25Decode(c) => c.consume_bytes(bytes),
            FrameCodec::Fx25Encode(c) => c.consume_bytes(bytes),
            FrameCodec::Fx25Decode(c) => c.consume_bytes(bytes),
            FrameCodec::Il2pEncode(c) => c.consume_bytes(bytes),
            FrameCodec::Il2pDecode(c) => c.consume_bytes(bytes),
        }
    }

    fn produce_bytes(&mut self) -> Option<Vec<u8>> {
        match self {
            FrameCodec::Ax25Encode(c) => c.produce_bytes(),
            FrameCodec::Ax25Decode(c) => c.produce_bytes(),
            FrameCodec::Fx25Encode(c) => c.produce_bytes(),
            FrameCodec::Fx25Decode(c) => c.produce_bytes(),
            FrameCodec::Il2pEncode(c) => c.produce_bytes(),
            FrameCodec::Il2pDecode(c) => c.produce_bytes(),
        }
    }

    fn configure(&mut self, param: CodecParam) -> Result<()> {
        match self {
            FrameCodec::Ax25Encode(c) => c.configure(param),
            FrameCodec::Ax25Decode(c) => c.configure(param),
            FrameCodec::Fx25Encode(c) => c.configure(param),
            FrameCodec::Fx25Decode(c) => c.configure(param),
            FrameCodec::Il2pEncode(c) => c.configure(param),
            FrameCodec::Il2pDecode(c) => c.configure(param),
        }
    }
}
