/*! Modulation negotiation sub-protocol.

Typed messages carried in-band over KISS (commands 0x10-0x14) that let
two TNCs agree on a modulation mode: request/response/ack for the
handshake, a mode change notification, and link quality feedback.

The initiator proposes a mode and waits (bounded) for a response; the
responder is stateless per request and answers immediately from the
intersection of the two stations' supported mode sets. When bound to
an adaptive rate control instance, the negotiator also watches for
local mode changes and tells the peers on its own.

Messages leave through an installed callback (KISS command plus
payload octets); the block never touches the transport itself.
 */
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::kiss::KissCommand;
use crate::rate::{ModulationMode, RateControl};
use crate::{Error, Result};

/// Default answer deadline for a negotiation request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Most supported modes advertised in one request.
pub const MAX_SUPPORTED_MODES: usize = 8;

/// One negotiation message.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationMessage {
    /// Propose a mode, advertising our supported set.
    Request {
        station_id: String,
        proposed: ModulationMode,
        supported: Vec<ModulationMode>,
    },
    /// Answer a request.
    Response {
        station_id: String,
        accepted: bool,
        mode: ModulationMode,
    },
    /// Confirm an accepted response.
    Ack { station_id: String, mode: ModulationMode },
    /// Announce a local mode change.
    ModeChange { station_id: String, mode: ModulationMode },
    /// Report measured link quality to the peer.
    QualityFeedback {
        station_id: String,
        snr_db: f32,
        ber: f32,
        quality: f32,
    },
}

fn put_station_id(out: &mut Vec<u8>, station_id: &str) {
    let id = station_id.as_bytes();
    let len = id.len().min(255);
    out.push(len as u8);
    out.extend_from_slice(&id[..len]);
}

fn get_station_id<'a>(data: &'a [u8], trailing: usize) -> Result<(String, &'a [u8])> {
    let Some((&len, rest)) = data.split_first() else {
        return Err(Error::malformed("empty negotiation payload"));
    };
    let len = len as usize;
    if rest.len() < len + trailing {
        return Err(Error::malformed("truncated negotiation payload"));
    }
    let id = String::from_utf8_lossy(&rest[..len]).into_owned();
    Ok((id, &rest[len..]))
}

fn get_mode(byte: u8) -> Result<ModulationMode> {
    ModulationMode::from_wire(byte)
        .ok_or_else(|| Error::malformed(format!("unknown modulation mode {byte:#04x}")))
}

impl NegotiationMessage {
    /// The KISS command this message travels under.
    pub fn command(&self) -> KissCommand {
        match self {
            NegotiationMessage::Request { .. } => KissCommand::NegReq,
            NegotiationMessage::Response { .. } => KissCommand::NegResp,
            NegotiationMessage::Ack { .. } => KissCommand::NegAck,
            NegotiationMessage::ModeChange { .. } => KissCommand::ModeChange,
            NegotiationMessage::QualityFeedback { .. } => KissCommand::QualityFeedback,
        }
    }

    /// Serialize the payload (without KISS framing).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            NegotiationMessage::Request {
                station_id,
                proposed,
                supported,
            } => {
                put_station_id(&mut out, station_id);
                out.push(proposed.to_wire());
                let n = supported.len().min(MAX_SUPPORTED_MODES);
                out.push(n as u8);
                for mode in &supported[..n] {
                    out.push(mode.to_wire());
                }
            }
            NegotiationMessage::Response {
                station_id,
                accepted,
                mode,
            } => {
                put_station_id(&mut out, station_id);
                out.push(*accepted as u8);
                out.push(mode.to_wire());
            }
            NegotiationMessage::Ack { station_id, mode }
            | NegotiationMessage::ModeChange { station_id, mode } => {
                put_station_id(&mut out, station_id);
                out.push(mode.to_wire());
            }
            NegotiationMessage::QualityFeedback {
                station_id,
                snr_db,
                ber,
                quality,
            } => {
                put_station_id(&mut out, station_id);
                out.extend_from_slice(&snr_db.to_le_bytes());
                out.extend_from_slice(&ber.to_le_bytes());
                out.extend_from_slice(&quality.to_le_bytes());
            }
        }
        out
    }

    /// Parse a payload arriving under `command`.
    pub fn decode(command: KissCommand, data: &[u8]) -> Result<NegotiationMessage> {
        match command {
            KissCommand::NegReq => {
                let (station_id, rest) = get_station_id(data, 2)?;
                let proposed = get_mode(rest[0])?;
                let n = rest[1] as usize;
                if n > MAX_SUPPORTED_MODES {
                    return Err(Error::malformed(format!("{n} supported modes")));
                }
                if rest.len() < 2 + n {
                    return Err(Error::malformed("truncated supported mode list"));
                }
                let supported = rest[2..2 + n]
                    .iter()
                    .map(|&b| get_mode(b))
                    .collect::<Result<Vec<_>>>()?;
                Ok(NegotiationMessage::Request {
                    station_id,
                    proposed,
                    supported,
                })
            }
            KissCommand::NegResp => {
                let (station_id, rest) = get_station_id(data, 2)?;
                Ok(NegotiationMessage::Response {
                    station_id,
                    accepted: rest[0] != 0,
                    mode: get_mode(rest[1])?,
                })
            }
            KissCommand::NegAck => {
                let (station_id, rest) = get_station_id(data, 1)?;
                Ok(NegotiationMessage::Ack {
                    station_id,
                    mode: get_mode(rest[0])?,
                })
            }
            KissCommand::ModeChange => {
                let (station_id, rest) = get_station_id(data, 1)?;
                Ok(NegotiationMessage::ModeChange {
                    station_id,
                    mode: get_mode(rest[0])?,
                })
            }
            KissCommand::QualityFeedback => {
                let (station_id, rest) = get_station_id(data, 12)?;
                let f = |i: usize| f32::from_le_bytes([rest[i], rest[i + 1], rest[i + 2], rest[i + 3]]);
                Ok(NegotiationMessage::QualityFeedback {
                    station_id,
                    snr_db: f(0),
                    ber: f(4),
                    quality: f(8),
                })
            }
            other => Err(Error::invalid(format!("{other:?} is not a negotiation command"))),
        }
    }
}

enum NegotiationState {
    Idle,
    /// A request is out; waiting for the response.
    Proposing {
        peer: String,
        proposed: ModulationMode,
        deadline: Instant,
    },
}

/// Callback used to hand outgoing messages to the KISS layer.
pub type FrameSender = Box<dyn FnMut(KissCommand, &[u8]) + Send>;

/// Initiator and responder state for one station.
pub struct Negotiator {
    station_id: String,
    supported: Vec<ModulationMode>,
    timeout: Duration,
    state: NegotiationState,
    /// Mode both sides last agreed on.
    negotiated: ModulationMode,
    /// Mode we are trying to move to.
    pending: ModulationMode,
    /// Last agreed mode per remote station.
    peers: BTreeMap<String, ModulationMode>,
    /// The peer NEG_REQs are initiated toward.
    primary_peer: Option<String>,
    sender: Option<FrameSender>,
    auto_enabled: bool,
    last_monitored: Option<ModulationMode>,
    timeouts: u64,
}

impl Negotiator {
    /// Create a negotiator. The first supported mode is the initial
    /// negotiated mode; an empty list defaults to 2FSK.
    pub fn new(station_id: &str, supported: Vec<ModulationMode>, timeout: Duration) -> Self {
        let initial = supported.first().copied().unwrap_or(ModulationMode::Fsk2);
        Self {
            station_id: station_id.to_string(),
            supported,
            timeout,
            state: NegotiationState::Idle,
            negotiated: initial,
            pending: initial,
            peers: BTreeMap::new(),
            primary_peer: None,
            sender: None,
            auto_enabled: false,
            last_monitored: None,
            timeouts: 0,
        }
    }

    /// Install (or replace) the outgoing frame callback.
    pub fn set_kiss_frame_sender(&mut self, sender: FrameSender) {
        self.sender = Some(sender);
    }

    /// The currently agreed mode.
    pub fn negotiated_mode(&self) -> ModulationMode {
        self.negotiated
    }

    /// A request is outstanding.
    pub fn is_negotiating(&self) -> bool {
        matches!(self.state, NegotiationState::Proposing { .. })
    }

    /// The mode we are moving to; equals the negotiated mode when no
    /// proposal is in flight.
    pub fn pending_mode(&self) -> ModulationMode {
        self.pending
    }

    /// Modes we advertise.
    pub fn supported_modes(&self) -> &[ModulationMode] {
        &self.supported
    }

    /// Last agreed mode for a given peer.
    pub fn peer_mode(&self, station_id: &str) -> Option<ModulationMode> {
        self.peers.get(station_id).copied()
    }

    /// Requests that went unanswered so far.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Watch a rate control for local mode changes on every tick.
    pub fn set_auto_negotiation_enabled(&mut self, enabled: bool) {
        self.auto_enabled = enabled;
        if !enabled {
            self.last_monitored = None;
        }
    }

    fn emit(&mut self, message: &NegotiationMessage) {
        // The payload is built before the callback runs; the callback
        // must not re-enter this block.
        let command = message.command();
        let payload = message.encode();
        if let Some(sender) = &mut self.sender {
            sender(command, &payload);
        } else {
            debug!("Negotiator: no frame sender installed, {command:?} dropped");
        }
    }

    /// Propose `mode` to `peer`. An unsupported mode falls back to the
    /// current negotiated mode, as a re-confirmation.
    pub fn initiate(&mut self, peer: &str, mode: ModulationMode, now: Instant) {
        let proposed = if self.supported.contains(&mode) {
            mode
        } else {
            debug!("Negotiator: {mode:?} not in supported set, proposing {:?}", self.negotiated);
            self.negotiated
        };
        self.pending = proposed;
        self.primary_peer = Some(peer.to_string());
        self.state = NegotiationState::Proposing {
            peer: peer.to_string(),
            proposed,
            deadline: now + self.timeout,
        };
        info!("Negotiator: proposing {proposed:?} to {peer}");
        self.emit(&NegotiationMessage::Request {
            station_id: self.station_id.clone(),
            proposed,
            supported: self.supported.clone(),
        });
    }

    /// Send a quality feedback message to the peer.
    pub fn send_quality_feedback(&mut self, snr_db: f32, ber: f32, quality: f32) {
        self.emit(&NegotiationMessage::QualityFeedback {
            station_id: self.station_id.clone(),
            snr_db,
            ber,
            quality,
        });
    }

    /// Process a received negotiation frame.
    pub fn handle_kiss(
        &mut self,
        command: KissCommand,
        payload: &[u8],
        rate: Option<&mut RateControl>,
    ) -> Result<()> {
        let message = NegotiationMessage::decode(command, payload)?;
        self.handle_message(message, rate);
        Ok(())
    }

    /// Process a decoded message.
    pub fn handle_message(&mut self, message: NegotiationMessage, rate: Option<&mut RateControl>) {
        match message {
            NegotiationMessage::Request {
                station_id,
                proposed,
                supported,
            } => self.respond(station_id, proposed, &supported, rate),
            NegotiationMessage::Response {
                station_id,
                accepted,
                mode,
            } => self.complete(station_id, accepted, mode, rate),
            NegotiationMessage::Ack { station_id, mode } => {
                debug!("Negotiator: {station_id} confirmed {mode:?}");
                self.peers.insert(station_id, mode);
            }
            NegotiationMessage::ModeChange { station_id, mode } => {
                info!("Negotiator: {station_id} switched to {mode:?}");
                self.peers.insert(station_id, mode);
            }
            NegotiationMessage::QualityFeedback {
                station_id,
                snr_db,
                ber,
                quality,
            } => {
                debug!(
                    "Negotiator: {station_id} reports snr {snr_db:.1} dB, ber {ber:.1e}, quality {quality:.2}"
                );
                if let Some(rate) = rate {
                    rate.update_quality(snr_db, ber, quality);
                }
            }
        }
    }

    /// Responder side: pick from the intersection and answer at once.
    fn respond(
        &mut self,
        peer: String,
        proposed: ModulationMode,
        peer_supported: &[ModulationMode],
        rate: Option<&mut RateControl>,
    ) {
        let common: Vec<ModulationMode> = self
            .supported
            .iter()
            .copied()
            .filter(|m| peer_supported.contains(m))
            .collect();
        let choice = if common.contains(&proposed) {
            Some(proposed)
        } else {
            common.iter().copied().max_by_key(|m| m.bit_rate())
        };
        match choice {
            Some(mode) => {
                info!("Negotiator: accepting {mode:?} from {peer}");
                self.negotiated = mode;
                self.pending = mode;
                self.peers.insert(peer.clone(), mode);
                if let Some(rate) = rate {
                    rate.set_mode(mode);
                }
                self.emit(&NegotiationMessage::Response {
                    station_id: self.station_id.clone(),
                    accepted: true,
                    mode,
                });
            }
            None => {
                warn!("Negotiator: no common mode with {peer}, rejecting");
                self.emit(&NegotiationMessage::Response {
                    station_id: self.station_id.clone(),
                    accepted: false,
                    mode: self.negotiated,
                });
            }
        }
    }

    /// Initiator side: apply or revert on the response.
    fn complete(
        &mut self,
        peer: String,
        accepted: bool,
        mode: ModulationMode,
        rate: Option<&mut RateControl>,
    ) {
        let NegotiationState::Proposing { .. } = &self.state else {
            debug!("Negotiator: unsolicited response from {peer}");
            return;
        };
        self.state = NegotiationState::Idle;
        if accepted {
            info!("Negotiator: {peer} accepted {mode:?}");
            self.negotiated = mode;
            self.pending = mode;
            self.peers.insert(peer, mode);
            if let Some(rate) = rate {
                rate.set_mode(mode);
            }
            self.emit(&NegotiationMessage::Ack {
                station_id: self.station_id.clone(),
                mode,
            });
        } else {
            info!("Negotiator: {peer} rejected, staying at {:?}", self.negotiated);
            self.pending = self.negotiated;
        }
    }

    /// Work cycle: expire the request timer and, when bound to a rate
    /// control, announce local mode changes.
    pub fn tick(&mut self, now: Instant, rate: Option<&mut RateControl>) {
        if let NegotiationState::Proposing { peer, proposed, deadline } = &self.state {
            if now >= *deadline {
                warn!("Negotiator: no answer from {peer} about {proposed:?}, reverting");
                self.timeouts += 1;
                self.pending = self.negotiated;
                self.state = NegotiationState::Idle;
            }
        }

        if !self.auto_enabled {
            return;
        }
        let Some(rate) = rate else {
            return;
        };
        let current = rate.mode();
        if self.last_monitored == Some(current) {
            return;
        }
        let first_observation = self.last_monitored.is_none();
        self.last_monitored = Some(current);
        if first_observation {
            return;
        }
        info!("Negotiator: local mode now {current:?}, notifying peers");
        if !self.peers.is_empty() {
            self.emit(&NegotiationMessage::ModeChange {
                station_id: self.station_id.clone(),
                mode: current,
            });
        }
        if let Some(peer) = self.primary_peer.clone() {
            if !self.is_negotiating() {
                self.initiate(&peer, current, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Sent = Arc<Mutex<Vec<(KissCommand, Vec<u8>)>>>;

    fn wired(negotiator: &mut Negotiator) -> Sent {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let clone = sent.clone();
        negotiator.set_kiss_frame_sender(Box::new(move |cmd, payload| {
            clone.lock().unwrap().push((cmd, payload.to_vec()));
        }));
        sent
    }

    fn sent_messages(sent: &Sent) -> Vec<NegotiationMessage> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|(cmd, payload)| NegotiationMessage::decode(*cmd, payload).unwrap())
            .collect()
    }

    #[test]
    fn message_roundtrip() {
        let messages = [
            NegotiationMessage::Request {
                station_id: "M0THC-1".into(),
                proposed: ModulationMode::Qpsk,
                supported: vec![ModulationMode::Bpsk, ModulationMode::Qpsk, ModulationMode::Psk8],
            },
            NegotiationMessage::Response {
                station_id: "W1AW".into(),
                accepted: true,
                mode: ModulationMode::Qpsk,
            },
            NegotiationMessage::Ack {
                station_id: "M0THC-1".into(),
                mode: ModulationMode::Qpsk,
            },
            NegotiationMessage::ModeChange {
                station_id: "W1AW".into(),
                mode: ModulationMode::Qam16,
            },
            NegotiationMessage::QualityFeedback {
                station_id: "W1AW".into(),
                snr_db: 17.5,
                ber: 1e-4,
                quality: 0.85,
            },
        ];
        for message in messages {
            let decoded = NegotiationMessage::decode(message.command(), &message.encode()).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn decode_rejects_truncation() {
        assert!(NegotiationMessage::decode(KissCommand::NegReq, &[]).is_err());
        // Station id length runs past the end.
        assert!(NegotiationMessage::decode(KissCommand::NegReq, &[10, b'A', 5]).is_err());
        // Supported mode count runs past the end.
        assert!(NegotiationMessage::decode(KissCommand::NegReq, &[1, b'A', 5, 3, 0]).is_err());
        // Unknown mode value.
        assert!(NegotiationMessage::decode(KissCommand::NegResp, &[1, b'A', 1, 99]).is_err());
        // Quality feedback needs 12 octets of floats.
        assert!(NegotiationMessage::decode(KissCommand::QualityFeedback, &[1, b'A', 0, 0]).is_err());
        // Not a negotiation command at all.
        assert!(NegotiationMessage::decode(KissCommand::Data, &[]).is_err());
    }

    #[test]
    fn responder_accepts_proposed_common_mode() {
        let mut negotiator = Negotiator::new(
            "LOCAL",
            vec![ModulationMode::Fsk4, ModulationMode::Qpsk, ModulationMode::Psk8],
            DEFAULT_TIMEOUT,
        );
        let sent = wired(&mut negotiator);

        negotiator.handle_message(
            NegotiationMessage::Request {
                station_id: "PEER".into(),
                proposed: ModulationMode::Qpsk,
                supported: vec![ModulationMode::Bpsk, ModulationMode::Qpsk],
            },
            None,
        );

        assert_eq!(
            sent_messages(&sent),
            vec![NegotiationMessage::Response {
                station_id: "LOCAL".into(),
                accepted: true,
                mode: ModulationMode::Qpsk,
            }]
        );
        assert_eq!(negotiator.negotiated_mode(), ModulationMode::Qpsk);
        assert_eq!(negotiator.peer_mode("PEER"), Some(ModulationMode::Qpsk));
    }

    #[test]
    fn responder_picks_highest_rate_common_mode() {
        let mut negotiator = Negotiator::new(
            "LOCAL",
            vec![ModulationMode::Fsk4, ModulationMode::Psk8, ModulationMode::Qam16],
            DEFAULT_TIMEOUT,
        );
        let sent = wired(&mut negotiator);

        // Proposal (QPSK) is not ours; QAM16 is the fastest common.
        negotiator.handle_message(
            NegotiationMessage::Request {
                station_id: "PEER".into(),
                proposed: ModulationMode::Qpsk,
                supported: vec![ModulationMode::Fsk4, ModulationMode::Qam16, ModulationMode::Qpsk],
            },
            None,
        );

        assert_eq!(
            sent_messages(&sent),
            vec![NegotiationMessage::Response {
                station_id: "LOCAL".into(),
                accepted: true,
                mode: ModulationMode::Qam16,
            }]
        );
    }

    #[test]
    fn responder_rejects_disjoint_sets() {
        let mut negotiator =
            Negotiator::new("LOCAL", vec![ModulationMode::Fsk2], DEFAULT_TIMEOUT);
        let sent = wired(&mut negotiator);

        negotiator.handle_message(
            NegotiationMessage::Request {
                station_id: "PEER".into(),
                proposed: ModulationMode::Qam64,
                supported: vec![ModulationMode::Qam64, ModulationMode::Qam16],
            },
            None,
        );

        let messages = sent_messages(&sent);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0],
            NegotiationMessage::Response { accepted: false, .. }
        ));
        assert_eq!(negotiator.peer_mode("PEER"), None);
    }

    #[test]
    fn initiator_applies_acceptance_and_acks() {
        let now = Instant::now();
        let mut negotiator = Negotiator::new(
            "LOCAL",
            vec![ModulationMode::Fsk4, ModulationMode::Qpsk],
            DEFAULT_TIMEOUT,
        );
        let sent = wired(&mut negotiator);
        let mut rate = RateControl::new(ModulationMode::Fsk4, true, 2.0);

        negotiator.initiate("PEER", ModulationMode::Qpsk, now);
        assert!(negotiator.is_negotiating());

        negotiator.handle_message(
            NegotiationMessage::Response {
                station_id: "PEER".into(),
                accepted: true,
                mode: ModulationMode::Qpsk,
            },
            Some(&mut rate),
        );

        assert!(!negotiator.is_negotiating());
        assert_eq!(negotiator.negotiated_mode(), ModulationMode::Qpsk);
        assert_eq!(rate.mode(), ModulationMode::Qpsk);
        let messages = sent_messages(&sent);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], NegotiationMessage::Request { .. }));
        assert_eq!(
            messages[1],
            NegotiationMessage::Ack {
                station_id: "LOCAL".into(),
                mode: ModulationMode::Qpsk,
            }
        );
    }

    #[test]
    fn initiator_reverts_on_rejection() {
        let now = Instant::now();
        let mut negotiator = Negotiator::new(
            "LOCAL",
            vec![ModulationMode::Fsk4, ModulationMode::Qpsk],
            DEFAULT_TIMEOUT,
        );
        let _sent = wired(&mut negotiator);

        negotiator.initiate("PEER", ModulationMode::Qpsk, now);
        negotiator.handle_message(
            NegotiationMessage::Response {
                station_id: "PEER".into(),
                accepted: false,
                mode: ModulationMode::Fsk4,
            },
            None,
        );
        assert!(!negotiator.is_negotiating());
        assert_eq!(negotiator.negotiated_mode(), ModulationMode::Fsk4);
    }

    #[test]
    fn timeout_reverts_quietly() {
        let now = Instant::now();
        let mut negotiator = Negotiator::new(
            "LOCAL",
            vec![ModulationMode::Fsk4, ModulationMode::Qpsk],
            Duration::from_millis(100),
        );
        let _sent = wired(&mut negotiator);

        negotiator.initiate("PEER", ModulationMode::Qpsk, now);
        assert_eq!(negotiator.pending_mode(), ModulationMode::Qpsk);
        negotiator.tick(now + Duration::from_millis(50), None);
        assert!(negotiator.is_negotiating());
        negotiator.tick(now + Duration::from_millis(150), None);
        assert!(!negotiator.is_negotiating());
        assert_eq!(negotiator.negotiated_mode(), ModulationMode::Fsk4);
        assert_eq!(negotiator.pending_mode(), ModulationMode::Fsk4);
        assert_eq!(negotiator.timeouts(), 1);
    }

    #[test]
    fn auto_negotiation_announces_mode_changes() {
        let now = Instant::now();
        let mut negotiator = Negotiator::new(
            "LOCAL",
            vec![ModulationMode::Fsk4, ModulationMode::Qpsk, ModulationMode::Qam16],
            DEFAULT_TIMEOUT,
        );
        let sent = wired(&mut negotiator);
        let mut rate = RateControl::new(ModulationMode::Fsk4, true, 2.0);
        negotiator.set_auto_negotiation_enabled(true);

        // Seed the primary peer and the peer table.
        negotiator.handle_message(
            NegotiationMessage::ModeChange {
                station_id: "PEER".into(),
                mode: ModulationMode::Fsk4,
            },
            None,
        );
        negotiator.initiate("PEER", ModulationMode::Fsk4, now);
        negotiator.handle_message(
            NegotiationMessage::Response {
                station_id: "PEER".into(),
                accepted: true,
                mode: ModulationMode::Fsk4,
            },
            Some(&mut rate),
        );
        sent.lock().unwrap().clear();

        // First tick only baselines the observed mode.
        negotiator.tick(now, Some(&mut rate));
        assert!(sent.lock().unwrap().is_empty());

        // A local mode change is announced and renegotiated.
        rate.set_mode(ModulationMode::Qam16);
        negotiator.tick(now, Some(&mut rate));
        let messages = sent_messages(&sent);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            NegotiationMessage::ModeChange {
                station_id: "LOCAL".into(),
                mode: ModulationMode::Qam16,
            }
        );
        assert!(matches!(
            messages[1],
            NegotiationMessage::Request { proposed: ModulationMode::Qam16, .. }
        ));

        // No change, no traffic.
        sent.lock().unwrap().clear();
        negotiator.tick(now, Some(&mut rate));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn unsupported_proposal_falls_back() {
        let now = Instant::now();
        let mut negotiator =
            Negotiator::new("LOCAL", vec![ModulationMode::Fsk4], DEFAULT_TIMEOUT);
        let sent = wired(&mut negotiator);
        negotiator.initiate("PEER", ModulationMode::Qam64, now);
        let messages = sent_messages(&sent);
        assert!(matches!(
            messages[0],
            NegotiationMessage::Request { proposed: ModulationMode::Fsk4, .. }
        ));
    }
}
