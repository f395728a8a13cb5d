/*! KISS host protocol.

The classic byte protocol between a host and a TNC: frames delimited
by FEND with FESC escaping, a command octet carrying the port in the
high nibble, and a handful of one-octet channel parameters. On top of
the standard commands this implementation carries the in-band
negotiation extension (0x10-0x14) used for adaptive modulation; those
command octets are taken whole, outside the port convention, as is the
RETURN octet 0xFF.

<https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)>
 */
use std::collections::VecDeque;

use log::{debug, info};

use crate::{Error, Result};

pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;

/// Longest accepted frame between FENDs.
const MAX_LEN: usize = 10_000;

/// KISS command set, including the negotiation extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KissCommand {
    /// Raw link layer frame.
    Data,
    /// Keyup delay, units of 10 ms.
    TxDelay,
    /// p-persistence value.
    Persistence,
    /// Slot interval, units of 10 ms.
    SlotTime,
    /// Keydown tail, units of 10 ms.
    TxTail,
    /// Full duplex on/off.
    FullDuplex,
    /// Vendor specific hardware control.
    SetHardware,
    /// Negotiation request.
    NegReq,
    /// Negotiation response.
    NegResp,
    /// Negotiation acknowledgement.
    NegAck,
    /// Local mode change notification.
    ModeChange,
    /// Link quality feedback.
    QualityFeedback,
    /// Leave KISS mode.
    Return,
}

impl KissCommand {
    /// The wire value. Negotiation commands and RETURN occupy the
    /// whole octet; the rest go in the low nibble under the port.
    pub fn to_wire(self) -> u8 {
        match self {
            KissCommand::Data => 0x00,
            KissCommand::TxDelay => 0x01,
            KissCommand::Persistence => 0x02,
            KissCommand::SlotTime => 0x03,
            KissCommand::TxTail => 0x04,
            KissCommand::FullDuplex => 0x05,
            KissCommand::SetHardware => 0x06,
            KissCommand::NegReq => 0x10,
            KissCommand::NegResp => 0x11,
            KissCommand::NegAck => 0x12,
            KissCommand::ModeChange => 0x13,
            KissCommand::QualityFeedback => 0x14,
            KissCommand::Return => 0xFF,
        }
    }

    /// True for the negotiation extension commands.
    pub fn is_negotiation(self) -> bool {
        matches!(
            self,
            KissCommand::NegReq
                | KissCommand::NegResp
                | KissCommand::NegAck
                | KissCommand::ModeChange
                | KissCommand::QualityFeedback
        )
    }
}

/// Split a received command octet into command and port.
fn parse_command(byte: u8) -> Result<(KissCommand, u8)> {
    match byte {
        0xFF => return Ok((KissCommand::Return, 0)),
        0x10 => return Ok((KissCommand::NegReq, 0)),
        0x11 => return Ok((KissCommand::NegResp, 0)),
        0x12 => return Ok((KissCommand::NegAck, 0)),
        0x13 => return Ok((KissCommand::ModeChange, 0)),
        0x14 => return Ok((KissCommand::QualityFeedback, 0)),
        _ => {}
    }
    let port = byte >> 4;
    let command = match byte & 0x0F {
        0x00 => KissCommand::Data,
        0x01 => KissCommand::TxDelay,
        0x02 => KissCommand::Persistence,
        0x03 => KissCommand::SlotTime,
        0x04 => KissCommand::TxTail,
        0x05 => KissCommand::FullDuplex,
        0x06 => KissCommand::SetHardware,
        other => {
            return Err(Error::malformed(format!("unknown KISS command {other:#04x}")));
        }
    };
    Ok((command, port))
}

/// One KISS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    pub command: KissCommand,
    pub port: u8,
    pub payload: Vec<u8>,
}

impl KissFrame {
    pub fn new(command: KissCommand, port: u8, payload: Vec<u8>) -> Self {
        Self { command, port, payload }
    }

    /// A data frame on the given port.
    pub fn data(port: u8, payload: Vec<u8>) -> Self {
        Self::new(KissCommand::Data, port, payload)
    }

    fn command_octet(&self) -> u8 {
        let wire = self.command.to_wire();
        if self.command.is_negotiation() || self.command == KissCommand::Return {
            wire
        } else {
            (self.port & 0x0F) << 4 | wire
        }
    }

    /// Serialize: FEND, command octet, escaped payload, FEND.
    pub fn encode(&self) -> Vec<u8> {
        // Leave a little room for escaping.
        let mut out = Vec::with_capacity((3 + self.payload.len()) * 110 / 100);
        out.push(FEND);
        out.push(self.command_octet());
        out.extend(escape(&self.payload));
        out.push(FEND);
        out
    }
}

/// Escape FEND and FESC in a payload.
#[must_use]
pub fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 110 / 100);
    for &b in bytes {
        match b {
            FEND => out.extend([FESC, TFEND]),
            FESC => out.extend([FESC, TFESC]),
            b => out.push(b),
        }
    }
    out
}

/// Undo [`escape`].
pub fn unescape(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut is_escaped = false;
    for &byte in data {
        if is_escaped {
            out.push(match byte {
                TFEND => FEND,
                TFESC => FESC,
                other => {
                    return Err(Error::malformed(format!("invalid KISS escape {other:#04x}")));
                }
            });
            is_escaped = false;
        } else if byte == FESC {
            is_escaped = true;
        } else if byte == FEND {
            return Err(Error::malformed("FEND inside a frame"));
        } else {
            out.push(byte);
        }
    }
    if is_escaped {
        return Err(Error::malformed("frame ends on an escape"));
    }
    Ok(out)
}

enum State {
    /// Between frames.
    Outside,
    /// Inside a frame, collecting octets.
    InFrame(Vec<u8>),
    /// Last octet was FESC.
    Escaped(Vec<u8>),
}

/// Streaming KISS deframer.
///
/// Empty frames (FEND FEND) are dropped silently; frames with bad
/// escapes or unknown commands are dropped and counted.
pub struct Deframer {
    state: State,
    frames: VecDeque<KissFrame>,
    dropped: u64,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            state: State::Outside,
            frames: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next complete frame.
    pub fn pop(&mut self) -> Option<KissFrame> {
        self.frames.pop_front()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push_byte(b);
        }
    }

    pub fn push_byte(&mut self, byte: u8) {
        let state = std::mem::replace(&mut self.state, State::Outside);
        self.state = match state {
            State::Outside => {
                if byte == FEND {
                    State::InFrame(Vec::new())
                } else {
                    State::Outside
                }
            }
            State::InFrame(mut buf) => {
                if byte == FEND {
                    if !buf.is_empty() {
                        self.complete(buf);
                    }
                    // A closing FEND doubles as the next opening one.
                    State::InFrame(Vec::new())
                } else if byte == FESC {
                    State::Escaped(buf)
                } else if buf.len() >= MAX_LEN {
                    debug!("KISS: oversized frame dropped");
                    self.dropped += 1;
                    State::Outside
                } else {
                    buf.push(byte);
                    State::InFrame(buf)
                }
            }
            State::Escaped(mut buf) => match byte {
                TFEND => {
                    buf.push(FEND);
                    State::InFrame(buf)
                }
                TFESC => {
                    buf.push(FESC);
                    State::InFrame(buf)
                }
                other => {
                    debug!("KISS: invalid escape {other:#04x}, frame dropped");
                    self.dropped += 1;
                    // Resynchronize on the next FEND.
                    State::Outside
                }
            },
        };
    }

    fn complete(&mut self, buf: Vec<u8>) {
        match parse_command(buf[0]) {
            Ok((command, port)) => {
                self.frames.push_back(KissFrame {
                    command,
                    port,
                    payload: buf[1..].to_vec(),
                });
            }
            Err(e) => {
                debug!("KISS: {e}");
                self.dropped += 1;
            }
        }
    }
}

/// Host side transport configuration, carried for the caller. This
/// crate never opens the device itself.
#[derive(Debug, Clone)]
pub struct KissConfig {
    pub device: String,
    pub baud: u32,
    pub hw_flow: bool,
}

impl Default for KissConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud: 9600,
            hw_flow: false,
        }
    }
}

/// Channel parameter state, standard TNC defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TncParams {
    /// Keyup delay in 10 ms units (300 ms).
    pub tx_delay: u8,
    /// p-persistence (p = 63/256).
    pub persistence: u8,
    /// Slot time in 10 ms units (100 ms).
    pub slot_time: u8,
    /// Keydown tail in 10 ms units (100 ms).
    pub tx_tail: u8,
    pub full_duplex: bool,
    /// Opaque SET_HARDWARE payload, if any was received.
    pub hardware: Vec<u8>,
}

impl Default for TncParams {
    fn default() -> Self {
        Self {
            tx_delay: 30,
            persistence: 63,
            slot_time: 10,
            tx_tail: 10,
            full_duplex: false,
            hardware: Vec::new(),
        }
    }
}

/// What a received KISS frame means to the layer above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KissEvent {
    /// A link layer frame to transmit (or deliver, direction
    /// depending on which side of the link we are).
    Data { port: u8, frame: Vec<u8> },
    /// A negotiation message to hand to the negotiation block.
    Negotiation { command: KissCommand, payload: Vec<u8> },
    /// The peer asked to leave KISS mode.
    ExitKiss,
}

/// KISS endpoint: deframer, parameter state, and an outgoing frame
/// queue.
pub struct KissTnc {
    config: KissConfig,
    params: TncParams,
    deframer: Deframer,
    tx: VecDeque<Vec<u8>>,
    kiss_mode: bool,
}

impl KissTnc {
    pub fn new(config: KissConfig) -> Self {
        Self {
            config,
            params: TncParams::default(),
            deframer: Deframer::new(),
            tx: VecDeque::new(),
            kiss_mode: true,
        }
    }

    /// Transport configuration handed in at construction.
    pub fn config(&self) -> &KissConfig {
        &self.config
    }

    /// Current channel parameters.
    pub fn params(&self) -> &TncParams {
        &self.params
    }

    /// Still in KISS mode (no RETURN received)?
    pub fn in_kiss_mode(&self) -> bool {
        self.kiss_mode
    }

    /// Frames dropped by the deframer.
    pub fn dropped(&self) -> u64 {
        self.deframer.dropped()
    }

    /// Feed received transport octets.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.deframer.push_bytes(bytes);
    }

    /// Interpret the next received frame, if any. Parameter commands
    /// are absorbed into [`TncParams`]; everything else is handed up.
    pub fn poll_event(&mut self) -> Option<KissEvent> {
        while let Some(frame) = self.deframer.pop() {
            match frame.command {
                KissCommand::Data => {
                    return Some(KissEvent::Data {
                        port: frame.port,
                        frame: frame.payload,
                    });
                }
                KissCommand::TxDelay => {
                    if let Some(&v) = frame.payload.first() {
                        self.params.tx_delay = v;
                    }
                }
                KissCommand::Persistence => {
                    if let Some(&v) = frame.payload.first() {
                        self.params.persistence = v;
                    }
                }
                KissCommand::SlotTime => {
                    if let Some(&v) = frame.payload.first() {
                        self.params.slot_time = v;
                    }
                }
                KissCommand::TxTail => {
                    if let Some(&v) = frame.payload.first() {
                        self.params.tx_tail = v;
                    }
                }
                KissCommand::FullDuplex => {
                    if let Some(&v) = frame.payload.first() {
                        self.params.full_duplex = v != 0;
                    }
                }
                KissCommand::SetHardware => {
                    self.params.hardware = frame.payload;
                }
                KissCommand::Return => {
                    info!("KISS: RETURN received, leaving KISS mode");
                    self.kiss_mode = false;
                    return Some(KissEvent::ExitKiss);
                }
                cmd if cmd.is_negotiation() => {
                    return Some(KissEvent::Negotiation {
                        command: cmd,
                        payload: frame.payload,
                    });
                }
                _ => unreachable!(),
            }
        }
        None
    }

    /// Queue an encoded frame for the transport.
    pub fn send_frame(&mut self, frame: &KissFrame) {
        self.tx.push_back(frame.encode());
    }

    /// Queue a data frame.
    pub fn send_data(&mut self, port: u8, payload: Vec<u8>) {
        self.send_frame(&KissFrame::data(port, payload));
    }

    /// Next encoded frame for the transport.
    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.tx.pop_front()
    }

    fn set_param(&mut self, command: KissCommand, value: u8) {
        self.send_frame(&KissFrame::new(command, 0, vec![value]));
    }

    /// Set the keyup delay (10 ms units) and tell the peer.
    pub fn set_tx_delay(&mut self, value: u8) {
        self.params.tx_delay = value;
        self.set_param(KissCommand::TxDelay, value);
    }

    /// Set p-persistence and tell the peer.
    pub fn set_persistence(&mut self, value: u8) {
        self.params.persistence = value;
        self.set_param(KissCommand::Persistence, value);
    }

    /// Set the slot time (10 ms units) and tell the peer.
    pub fn set_slot_time(&mut self, value: u8) {
        self.params.slot_time = value;
        self.set_param(KissCommand::SlotTime, value);
    }

    /// Set the keydown tail (10 ms units) and tell the peer.
    pub fn set_tx_tail(&mut self, value: u8) {
        self.params.tx_tail = value;
        self.set_param(KissCommand::TxTail, value);
    }

    /// Set full duplex and tell the peer.
    pub fn set_full_duplex(&mut self, on: bool) {
        self.params.full_duplex = on;
        self.set_param(KissCommand::FullDuplex, on as u8);
    }
}
