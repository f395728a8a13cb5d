/*! AX.25 frame layer.

Address encoding, control octets, frame assembly and parsing, and the
XID parameter carriage from AX.25 v2.2.

An AX.25 frame on the wire is:

```text
| dest (7) | src (7) | digipeaters (0-56) | control (1) | PID (0-1) | info (0-256) | FCS (2) |
```

Address octets carry the callsign shifted left one bit; the seventh
octet packs the SSID, the C (or has-been-repeated) bit, and the
end-of-address bit in its LSB. The PID octet is present only on I and
UI frames. The FCS covers everything from the first address octet to
the last info octet and travels low octet first.
 */
use std::fmt;

use crate::fcs;
use crate::{Error, Result};

/// Longest allowed info field, in octets.
pub const MAX_INFO: usize = 256;

/// Most addresses a frame can carry: destination, source, and up to
/// eight digipeaters.
pub const MAX_ADDRS: usize = 10;

/// "No layer 3" PID, the usual value for UI traffic.
pub const PID_NO_LAYER3: u8 = 0xF0;

/// AX.25 station address: callsign plus SSID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Up to six characters, stored uppercase without padding.
    pub call: String,
    /// Secondary station identifier, 0-15.
    pub ssid: u8,
    /// Top bit of the SSID octet: the C bit on destination and source
    /// entries, the has-been-repeated bit on digipeater entries.
    pub c: bool,
}

impl Address {
    /// Create an address. The callsign is uppercased; it must be at
    /// most six characters and the SSID at most 15.
    pub fn new(call: &str, ssid: u8) -> Result<Self> {
        if call.is_empty() || call.len() > 6 || !call.is_ascii() {
            return Err(Error::invalid(format!("bad callsign {call:?}")));
        }
        if ssid > 15 {
            return Err(Error::invalid(format!("SSID {ssid} out of range")));
        }
        Ok(Self {
            call: call.to_ascii_uppercase(),
            ssid,
            c: false,
        })
    }

    /// Same, with the C bit set.
    pub fn command(call: &str, ssid: u8) -> Result<Self> {
        let mut a = Self::new(call, ssid)?;
        a.c = true;
        Ok(a)
    }

    /// Encode into seven wire octets. `last` sets the end-of-address
    /// bit.
    pub fn encode(&self, last: bool) -> [u8; 7] {
        let mut out = [b' ' << 1; 7];
        for (i, b) in self.call.bytes().take(6).enumerate() {
            out[i] = b << 1;
        }
        // Reserved bits transmitted as ones.
        let mut ssid = 0x60 | ((self.ssid & 0x0F) << 1);
        if self.c {
            ssid |= 0x80;
        }
        if last {
            ssid |= 0x01;
        }
        out[6] = ssid;
        out
    }

    /// Decode seven wire octets. Returns the address and whether the
    /// end-of-address bit was set.
    pub fn parse(bytes: &[u8]) -> Result<(Self, bool)> {
        if bytes.len() < 7 {
            return Err(Error::malformed("truncated address field"));
        }
        let call: String = bytes[..6]
            .iter()
            .map(|&b| ((b >> 1) & 0x7F) as char)
            .collect::<String>()
            .trim_end()
            .to_string();
        if call.is_empty() {
            return Err(Error::malformed("empty callsign"));
        }
        let ssid_byte = bytes[6];
        Ok((
            Self {
                call,
                ssid: (ssid_byte >> 1) & 0x0F,
                c: ssid_byte & 0x80 != 0,
            },
            ssid_byte & 0x01 != 0,
        ))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid > 0 {
            write!(f, "{}-{}", self.call, self.ssid)
        } else {
            write!(f, "{}", self.call)
        }
    }
}

/// Decoded control octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Information frame with send and receive sequence numbers.
    I { ns: u8, nr: u8, pf: bool },
    /// Receive ready.
    Rr { nr: u8, pf: bool },
    /// Receive not ready.
    Rnr { nr: u8, pf: bool },
    /// Reject.
    Rej { nr: u8, pf: bool },
    /// Selective reject.
    Srej { nr: u8, pf: bool },
    /// Set asynchronous balanced mode (connect request).
    Sabm { pf: bool },
    /// Disconnect request.
    Disc { pf: bool },
    /// Unnumbered acknowledge.
    Ua { pf: bool },
    /// Disconnected mode.
    Dm { pf: bool },
    /// Unnumbered information.
    Ui { pf: bool },
    /// Exchange identification.
    Xid { pf: bool },
    /// Frame reject.
    Frmr { pf: bool },
}

const PF_BIT: u8 = 0x10;

impl Control {
    /// Encode to the wire octet.
    pub fn encode(&self) -> u8 {
        let pf = |b: bool| if b { PF_BIT } else { 0 };
        match *self {
            Control::I { ns, nr, pf: p } => (nr & 7) << 5 | pf(p) | (ns & 7) << 1,
            Control::Rr { nr, pf: p } => (nr & 7) << 5 | pf(p) | 0x01,
            Control::Rnr { nr, pf: p } => (nr & 7) << 5 | pf(p) | 0x05,
            Control::Rej { nr, pf: p } => (nr & 7) << 5 | pf(p) | 0x09,
            Control::Srej { nr, pf: p } => (nr & 7) << 5 | pf(p) | 0x0D,
            Control::Sabm { pf: p } => 0x2F | pf(p),
            Control::Disc { pf: p } => 0x43 | pf(p),
            Control::Ua { pf: p } => 0x63 | pf(p),
            Control::Dm { pf: p } => 0x0F | pf(p),
            Control::Ui { pf: p } => 0x03 | pf(p),
            Control::Xid { pf: p } => 0xAF | pf(p),
            Control::Frmr { pf: p } => 0x87 | pf(p),
        }
    }

    /// Decode a wire octet.
    pub fn decode(c: u8) -> Result<Control> {
        let pf = c & PF_BIT != 0;
        if c & 0x01 == 0 {
            return Ok(Control::I {
                ns: (c >> 1) & 7,
                nr: (c >> 5) & 7,
                pf,
            });
        }
        if c & 0x03 == 0x01 {
            let nr = (c >> 5) & 7;
            return match c & 0x0F {
                0x01 => Ok(Control::Rr { nr, pf }),
                0x05 => Ok(Control::Rnr { nr, pf }),
                0x09 => Ok(Control::Rej { nr, pf }),
                0x0D => Ok(Control::Srej { nr, pf }),
                _ => Err(Error::malformed(format!("bad S control {c:#04x}"))),
            };
        }
        match c & !PF_BIT {
            0x03 => Ok(Control::Ui { pf }),
            0x0F => Ok(Control::Dm { pf }),
            0x2F => Ok(Control::Sabm { pf }),
            0x43 => Ok(Control::Disc { pf }),
            0x63 => Ok(Control::Ua { pf }),
            0x87 => Ok(Control::Frmr { pf }),
            0xAF => Ok(Control::Xid { pf }),
            _ => Err(Error::malformed(format!("unknown U control {c:#04x}"))),
        }
    }

    /// True for frames that carry a PID octet (I and UI).
    pub fn has_pid(&self) -> bool {
        matches!(self, Control::I { .. } | Control::Ui { .. })
    }

    /// The poll/final bit.
    pub fn pf(&self) -> bool {
        match *self {
            Control::I { pf, .. }
            | Control::Rr { pf, .. }
            | Control::Rnr { pf, .. }
            | Control::Rej { pf, .. }
            | Control::Srej { pf, .. }
            | Control::Sabm { pf }
            | Control::Disc { pf }
            | Control::Ua { pf }
            | Control::Dm { pf }
            | Control::Ui { pf }
            | Control::Xid { pf }
            | Control::Frmr { pf } => pf,
        }
    }
}

/// One AX.25 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination, source, then 0-8 digipeaters.
    pub addresses: Vec<Address>,
    pub control: Control,
    /// Present exactly when `control.has_pid()`.
    pub pid: Option<u8>,
    pub info: Vec<u8>,
}

impl Frame {
    /// A UI datagram.
    pub fn ui(dest: Address, src: Address, pid: u8, info: Vec<u8>) -> Self {
        Self {
            addresses: vec![dest, src],
            control: Control::Ui { pf: false },
            pid: Some(pid),
            info,
        }
    }

    /// An I frame carrying connected-mode data.
    pub fn iframe(dest: Address, src: Address, ns: u8, nr: u8, pf: bool, info: Vec<u8>) -> Self {
        Self {
            addresses: vec![dest, src],
            control: Control::I { ns, nr, pf },
            pid: Some(PID_NO_LAYER3),
            info,
        }
    }

    /// A bare control frame (S or U) with no info field.
    pub fn control_frame(dest: Address, src: Address, control: Control) -> Self {
        Self {
            addresses: vec![dest, src],
            control,
            pid: None,
            info: Vec::new(),
        }
    }

    /// An XID frame carrying encoded parameters.
    pub fn xid(dest: Address, src: Address, pf: bool, xid: &Xid) -> Self {
        Self {
            addresses: vec![dest, src],
            control: Control::Xid { pf },
            pid: None,
            info: xid.encode(),
        }
    }

    /// Destination address.
    pub fn dest(&self) -> &Address {
        &self.addresses[0]
    }

    /// Source address.
    pub fn src(&self) -> &Address {
        &self.addresses[1]
    }

    /// Digipeater path, possibly empty.
    pub fn digipeaters(&self) -> &[Address] {
        &self.addresses[2..]
    }

    /// Append a digipeater to the path.
    pub fn add_digipeater(&mut self, digi: Address) -> Result<()> {
        if self.addresses.len() >= MAX_ADDRS {
            return Err(Error::invalid("digipeater path full"));
        }
        self.addresses.push(digi);
        Ok(())
    }

    /// Serialize to wire octets, FCS included.
    pub fn assemble(&self) -> Result<Vec<u8>> {
        if self.addresses.len() < 2 || self.addresses.len() > MAX_ADDRS {
            return Err(Error::invalid(format!(
                "frame with {} addresses",
                self.addresses.len()
            )));
        }
        if self.info.len() > MAX_INFO {
            return Err(Error::invalid(format!("info field of {} octets", self.info.len())));
        }
        if self.control.has_pid() != self.pid.is_some() {
            return Err(Error::invalid("PID presence does not match frame type"));
        }
        let mut out = Vec::with_capacity(self.addresses.len() * 7 + 4 + self.info.len());
        let last = self.addresses.len() - 1;
        for (i, addr) in self.addresses.iter().enumerate() {
            out.extend_from_slice(&addr.encode(i == last));
        }
        out.push(self.control.encode());
        if let Some(pid) = self.pid {
            out.push(pid);
        }
        out.extend_from_slice(&self.info);
        fcs::append(&mut out);
        Ok(out)
    }

    /// Parse wire octets (FCS included) into a frame.
    pub fn parse(data: &[u8]) -> Result<Frame> {
        // Two addresses, control, FCS is the floor.
        if data.len() < 17 {
            return Err(Error::malformed(format!("frame of {} octets too short", data.len())));
        }
        if !fcs::check(data) {
            return Err(Error::malformed("FCS mismatch"));
        }
        let body = &data[..data.len() - 2];

        let mut addresses = Vec::new();
        let mut pos = 0;
        loop {
            if addresses.len() == MAX_ADDRS {
                return Err(Error::malformed("no end-of-address bit within 10 addresses"));
            }
            if pos + 7 > body.len() {
                return Err(Error::malformed("truncated address field"));
            }
            let (addr, last) = Address::parse(&body[pos..pos + 7])?;
            addresses.push(addr);
            pos += 7;
            if last {
                break;
            }
        }
        if addresses.len() < 2 {
            return Err(Error::malformed("fewer than two addresses"));
        }

        if pos >= body.len() {
            return Err(Error::malformed("missing control octet"));
        }
        let control = Control::decode(body[pos])?;
        pos += 1;

        let pid = if control.has_pid() {
            if pos >= body.len() {
                return Err(Error::malformed("missing PID octet"));
            }
            pos += 1;
            Some(body[pos - 1])
        } else {
            None
        };

        let info = body[pos..].to_vec();
        if info.len() > MAX_INFO {
            return Err(Error::malformed(format!("info field of {} octets", info.len())));
        }
        if !info.is_empty() && !control.has_pid() && !matches!(control, Control::Xid { .. } | Control::Frmr { .. })
        {
            return Err(Error::malformed("info field on a bare control frame"));
        }
        Ok(Frame {
            addresses,
            control,
            pid,
            info,
        })
    }
}

/// XID format identifier for AX.25 v2.2 parameter negotiation.
pub const XID_FORMAT_ID: u8 = 0x82;
/// XID group identifier for the HDLC parameter set.
pub const XID_GROUP_ID: u8 = 0x80;

/// Maximum number of parameters carried in one XID frame.
pub const XID_MAX_PARAMS: usize = 8;
/// Maximum length of one XID parameter value.
pub const XID_MAX_VALUE: usize = 16;

/// One XID parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XidParam {
    pub typ: u8,
    pub value: Vec<u8>,
}

/// XID parameter block carried in the info field of an XID frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xid {
    pub format_id: u8,
    pub group_id: u8,
    pub params: Vec<XidParam>,
}

impl Default for Xid {
    fn default() -> Self {
        Self::new()
    }
}

impl Xid {
    /// An empty parameter block with the standard identifiers.
    pub fn new() -> Self {
        Self {
            format_id: XID_FORMAT_ID,
            group_id: XID_GROUP_ID,
            params: Vec::new(),
        }
    }

    /// Add one parameter.
    pub fn add_param(&mut self, typ: u8, value: &[u8]) -> Result<()> {
        if self.params.len() >= XID_MAX_PARAMS {
            return Err(Error::invalid("too many XID parameters"));
        }
        if value.is_empty() || value.len() > XID_MAX_VALUE {
            return Err(Error::invalid(format!("XID value of {} octets", value.len())));
        }
        self.params.push(XidParam {
            typ,
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Look up a parameter value by type.
    pub fn param(&self, typ: u8) -> Option<&[u8]> {
        self.params.iter().find(|p| p.typ == typ).map(|p| p.value.as_slice())
    }

    /// Serialize as `format_id | group_id | {type, len, value}*`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.format_id, self.group_id];
        for p in &self.params {
            out.push(p.typ);
            out.push(p.value.len() as u8);
            out.extend_from_slice(&p.value);
        }
        out
    }

    /// Parse an XID info field.
    pub fn decode(data: &[u8]) -> Result<Xid> {
        if data.len() < 2 {
            return Err(Error::malformed("XID block too short"));
        }
        let mut xid = Xid {
            format_id: data[0],
            group_id: data[1],
            params: Vec::new(),
        };
        let mut pos = 2;
        while pos < data.len() {
            if xid.params.len() == XID_MAX_PARAMS {
                return Err(Error::malformed("too many XID parameters"));
            }
            if pos + 2 > data.len() {
                return Err(Error::malformed("truncated XID parameter header"));
            }
            let typ = data[pos];
            let len = data[pos + 1] as usize;
            pos += 2;
            if len > XID_MAX_VALUE {
                return Err(Error::malformed(format!("XID value length {len}")));
            }
            if pos + len > data.len() {
                return Err(Error::malformed("truncated XID parameter value"));
            }
            xid.params.push(XidParam {
                typ,
                value: data[pos..pos + len].to_vec(),
            });
            pos += len;
        }
        Ok(xid)
    }
}
