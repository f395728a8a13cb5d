/*! This crate provides the protocol stack of a packet radio TNC
(terminal node controller).

It implements three interoperable link layer wire formats:
[AX.25][ax25] (the classic HDLC-derived amateur packet protocol),
[FX.25][fx25] (AX.25 wrapped in a correlation-tagged Reed-Solomon
outer code), and [IL2P][il2p] (the improved layer 2 protocol with
Reed-Solomon FEC and data scrambling), plus the [KISS][kiss] host
protocol with an in-band negotiation extension for adaptive
modulation.

DSP is out of scope. The modem below this crate deals in symbols and
samples; this crate deals in bits and bytes. The seam is an octet (or
unpacked bit) stream in each direction, plus link quality samples
coming up from the demodulator.

# Architecture overview

Transmit path:

```text
   [ user payload ]
         ↓
   [ link state machine ]      link
         ↓
   [ frame assembly ]          ax25
         ↓
   [ FX.25 or IL2P FEC ]       fx25 / il2p (optional)
         ↓
   [ HDLC bit stuffing ]       hdlc
         ↓
     modulator
```

Receive is the mirror image, with the link quality monitor
([`quality`]) fed from the demodulator and the adaptive rate control
([`rate`]) choosing a modulation mode from it. The negotiation block
([`negotiation`]) tells the peer TNC about mode changes in-band over
KISS ([`kiss`]).

# Example

Assemble a UI frame and round-trip it through the parser:

```
use packet_protocols::ax25::{Address, Frame, PID_NO_LAYER3};

let frame = Frame::ui(
    Address::new("N0CALL", 0)?,
    Address::new("W1AW", 5)?,
    PID_NO_LAYER3,
    b"HELLO".to_vec(),
);
let wire = frame.assemble()?;
let back = Frame::parse(&wire)?;
assert_eq!(back, frame);
# Ok::<(), packet_protocols::Error>(())
```

[ax25]: https://en.wikipedia.org/wiki/AX.25
[fx25]: https://en.wikipedia.org/wiki/FX.25
[il2p]: https://en.wikipedia.org/wiki/Improved_Layer_2_Protocol
[kiss]: https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)
 */

pub mod ax25;
pub mod codec;
pub mod fcs;
pub mod fx25;
pub mod gf;
pub mod hdlc;
pub mod il2p;
pub mod kiss;
pub mod link;
pub mod negotiation;
pub mod quality;
pub mod rate;
pub mod rs;

/// Crate error type.
///
/// Every failure is tagged with one of these kinds. Decode paths treat
/// most of them as per-frame events: the frame is dropped and counted,
/// and processing continues with the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame failed structural validation: truncated addresses, bad
    /// E-bit sequence, oversized info field, FCS mismatch.
    MalformedFrame(String),

    /// Reed-Solomon decoder could not correct the codeword.
    UncorrectableFec(String),

    /// No known FX.25 correlation tag found in the stream.
    UnknownTag(String),

    /// A negotiation request went unanswered.
    NegotiationTimeout(String),

    /// Operation not valid in the current protocol state.
    StateViolation(String),

    /// Connection table or transmit window full.
    ResourceExhausted(String),

    /// Bad parameter from the caller.
    InvalidArgument(String),
}

impl Error {
    /// Shorthand constructor for [`Error::MalformedFrame`].
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedFrame(msg.into())
    }
    /// Shorthand constructor for [`Error::InvalidArgument`].
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
            Error::UncorrectableFec(msg) => write!(f, "uncorrectable FEC: {msg}"),
            Error::UnknownTag(msg) => write!(f, "unknown correlation tag: {msg}"),
            Error::NegotiationTimeout(msg) => write!(f, "negotiation timeout: {msg}"),
            Error::StateViolation(msg) => write!(f, "state violation: {msg}"),
            Error::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Crate result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
