/*! AX.25 connected-mode link layer.

A LAPB-subset state machine: SABM/UA connection setup, modulo-8 I
frame sequencing with a bounded send window, RR/RNR/REJ supervisory
handling, DISC teardown, and the T1/T2/T3 timers. One [`Tnc`] owns up
to [`MAX_CONNECTIONS`] connections keyed by remote address.

Timers are plain deadlines checked from [`Tnc::tick`]; nothing here
sleeps or spawns threads. The caller supplies `Instant::now()` to
every entry point, drives `tick` from its work cycle, and drains
outgoing frames with [`Tnc::pop_outgoing`] and upcalls with
[`Tnc::receive`].
 */
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::ax25::{Address, Control, Frame};
use crate::{Error, Result};

/// Most simultaneous connections one TNC will carry.
pub const MAX_CONNECTIONS: usize = 16;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Link layer tuning knobs, with the standard TNC defaults.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Send window k: outstanding I frames allowed, 1..=7.
    pub window: u8,
    /// Acknowledgement timer.
    pub t1: Duration,
    /// Response delay timer (delayed RR).
    pub t2: Duration,
    /// Idle link poll timer.
    pub t3: Duration,
    /// Retries before giving up on T1.
    pub max_retries: u8,
    /// Largest I frame info field accepted for transmit.
    pub max_info: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            window: 4,
            t1: Duration::from_millis(3000),
            t2: Duration::from_millis(1000),
            t3: Duration::from_millis(30000),
            max_retries: 3,
            max_info: crate::ax25::MAX_INFO,
        }
    }
}

/// Soft deadline checked from the work cycle.
#[derive(Debug, Default)]
struct Timer {
    expiry: Option<Instant>,
}

impl Timer {
    fn start(&mut self, now: Instant, after: Duration) {
        self.expiry = Some(now + after);
    }
    fn stop(&mut self) {
        self.expiry = None;
    }
    fn running(&self) -> bool {
        self.expiry.is_some()
    }
    fn expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|e| now >= e)
    }
}

/// Upcalls to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Connection established (either side initiated).
    Connected(Address),
    /// Outgoing connect gave up.
    ConnectFailed(Address),
    /// Connection ended, by DISC, DM, FRMR or retry exhaustion.
    Disconnected(Address),
    /// In-sequence connected-mode data.
    Data(Address, Vec<u8>),
    /// Connectionless UI datagram.
    UiData(Address, Vec<u8>),
}

struct Connection {
    remote: Address,
    state: LinkState,
    /// Send, receive, and acknowledge state variables, modulo 8.
    vs: u8,
    vr: u8,
    va: u8,
    retries: u8,
    t1: Timer,
    t2: Timer,
    t3: Timer,
    peer_busy: bool,
    /// Sent but unacknowledged I frames, oldest first: (N(S), info).
    unacked: VecDeque<(u8, Vec<u8>)>,
}

impl Connection {
    fn new(remote: Address) -> Self {
        Self {
            remote,
            state: LinkState::Disconnected,
            vs: 0,
            vr: 0,
            va: 0,
            retries: 0,
            t1: Timer::default(),
            t2: Timer::default(),
            t3: Timer::default(),
            peer_busy: false,
            unacked: VecDeque::new(),
        }
    }

    fn reset_sequencing(&mut self) {
        self.vs = 0;
        self.vr = 0;
        self.va = 0;
        self.retries = 0;
        self.peer_busy = false;
        self.unacked.clear();
    }
}

/// The connected-mode TNC: connection table plus frame and event
/// queues.
pub struct Tnc {
    local: Address,
    config: LinkConfig,
    connections: Vec<Connection>,
    tx: VecDeque<Frame>,
    events: VecDeque<LinkEvent>,
}

fn same_station(a: &Address, b: &Address) -> bool {
    a.call == b.call && a.ssid == b.ssid
}

impl Tnc {
    /// Create a TNC for the given local address.
    pub fn new(local: Address, config: LinkConfig) -> Self {
        Self {
            local,
            config,
            connections: Vec::new(),
            tx: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Local station address.
    pub fn local(&self) -> &Address {
        &self.local
    }

    /// State of the connection to `remote`, if one exists.
    pub fn state_of(&self, remote: &Address) -> Option<LinkState> {
        self.connections.iter().find(|c| same_station(&c.remote, remote)).map(|c| c.state)
    }

    /// Next frame queued for transmission.
    pub fn pop_outgoing(&mut self) -> Option<Frame> {
        self.tx.pop_front()
    }

    /// Next upcall for the host.
    pub fn receive(&mut self) -> Option<LinkEvent> {
        self.events.pop_front()
    }

    /// Initiate a connection: transmit SABM and wait for UA.
    pub fn connect(&mut self, remote: Address, now: Instant) -> Result<()> {
        if let Some(conn) = self.find(&remote) {
            return match conn.state {
                LinkState::Connecting | LinkState::Connected => Ok(()),
                state => Err(Error::StateViolation(format!(
                    "connect to {remote} while {state:?}"
                ))),
            };
        }
        if self.connections.len() >= MAX_CONNECTIONS {
            return Err(Error::ResourceExhausted("connection table full".into()));
        }
        let mut conn = Connection::new(remote.clone());
        conn.state = LinkState::Connecting;
        conn.t1.start(now, self.config.t1);
        self.connections.push(conn);
        info!("Link: connecting to {remote}");
        self.send_control(&remote, Control::Sabm { pf: true }, true);
        Ok(())
    }

    /// Tear down a connection: transmit DISC and wait for UA.
    pub fn disconnect(&mut self, remote: &Address, now: Instant) -> Result<()> {
        let t1 = self.config.t1;
        let Some(conn) = self.find_mut(remote) else {
            return Err(Error::StateViolation(format!("disconnect of unknown link {remote}")));
        };
        match conn.state {
            LinkState::Connected => {
                conn.state = LinkState::Disconnecting;
                conn.retries = 0;
                conn.t1.start(now, t1);
                conn.t2.stop();
                conn.t3.stop();
                info!("Link: disconnecting from {remote}");
                self.send_control(remote, Control::Disc { pf: true }, true);
                Ok(())
            }
            LinkState::Connecting => {
                self.drop_connection(remote);
                self.events.push_back(LinkEvent::Disconnected(remote.clone()));
                Ok(())
            }
            state => Err(Error::StateViolation(format!(
                "disconnect of {remote} while {state:?}"
            ))),
        }
    }

    /// Send connected-mode data as an I frame.
    pub fn send(&mut self, remote: &Address, data: &[u8], now: Instant) -> Result<()> {
        if data.len() > self.config.max_info {
            return Err(Error::invalid(format!("info field of {} octets", data.len())));
        }
        let (window, t1) = (self.config.window, self.config.t1);
        let Some(conn) = self.find_mut(remote) else {
            return Err(Error::StateViolation(format!("send on unknown link {remote}")));
        };
        if conn.state != LinkState::Connected {
            return Err(Error::StateViolation(format!(
                "send on {remote} while {:?}",
                conn.state
            )));
        }
        if conn.unacked.len() >= window as usize {
            return Err(Error::ResourceExhausted(format!("send window to {remote} full")));
        }
        if conn.peer_busy {
            return Err(Error::ResourceExhausted(format!("peer {remote} busy (RNR)")));
        }
        let ns = conn.vs;
        let nr = conn.vr;
        conn.vs = (conn.vs + 1) % 8;
        conn.unacked.push_back((ns, data.to_vec()));
        conn.t1.start(now, t1);
        let frame = Frame::iframe(
            Address { c: true, ..remote.clone() },
            Address { c: false, ..self.local.clone() },
            ns,
            nr,
            false,
            data.to_vec(),
        );
        self.tx.push_back(frame);
        Ok(())
    }

    /// Send a connectionless UI datagram, optionally via digipeaters.
    pub fn send_ui(&mut self, dest: &Address, digipeaters: &[Address], pid: u8, data: &[u8]) -> Result<()> {
        if data.len() > self.config.max_info {
            return Err(Error::invalid(format!("info field of {} octets", data.len())));
        }
        let mut frame = Frame::ui(
            Address { c: true, ..dest.clone() },
            Address { c: false, ..self.local.clone() },
            pid,
            data.to_vec(),
        );
        for digi in digipeaters {
            frame.add_digipeater(digi.clone())?;
        }
        self.tx.push_back(frame);
        Ok(())
    }

    /// Process one received, FCS-checked frame addressed to us.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) {
        if !same_station(frame.dest(), &self.local) {
            debug!("Link: frame for {} is not for us", frame.dest());
            return;
        }
        let src = frame.src().clone();
        let is_command = frame.dest().c && !frame.src().c;
        match frame.control {
            Control::Sabm { pf } => self.on_sabm(&src, pf, now),
            Control::Ua { .. } => self.on_ua(&src, now),
            Control::Dm { .. } => self.on_dm(&src),
            Control::Disc { pf } => self.on_disc(&src, pf),
            Control::Frmr { .. } => self.on_frmr(&src),
            Control::I { ns, nr, pf } => self.on_iframe(&src, ns, nr, pf, &frame.info, now),
            Control::Rr { nr, pf } => {
                self.on_ack(&src, nr, false, now);
                self.maybe_final(&src, pf, is_command);
            }
            Control::Rnr { nr, pf } => {
                self.on_ack(&src, nr, true, now);
                self.maybe_final(&src, pf, is_command);
            }
            Control::Rej { nr, pf } => self.on_rej(&src, nr, pf, is_command, now),
            Control::Srej { nr, .. } => self.on_srej(&src, nr, now),
            Control::Ui { .. } => {
                self.events.push_back(LinkEvent::UiData(src, frame.info.clone()));
            }
            Control::Xid { .. } => {
                debug!("Link: XID from {src} passed to host");
                self.events.push_back(LinkEvent::UiData(src, frame.info.clone()));
            }
        }
    }

    /// Evaluate all timers. Call once per work cycle.
    pub fn tick(&mut self, now: Instant) {
        let config = self.config.clone();
        let mut sends: Vec<(Address, Control, bool)> = Vec::new();
        let mut iframes: Vec<(Address, u8, u8, Vec<u8>)> = Vec::new();
        let mut dead: Vec<Address> = Vec::new();

        for conn in &mut self.connections {
            if conn.t1.expired(now) {
                conn.t1.stop();
                if conn.retries >= config.max_retries {
                    warn!("Link: {} retries exhausted in {:?}", conn.remote, conn.state);
                    let event = match conn.state {
                        LinkState::Connecting => LinkEvent::ConnectFailed(conn.remote.clone()),
                        _ => LinkEvent::Disconnected(conn.remote.clone()),
                    };
                    conn.state = LinkState::Disconnected;
                    self.events.push_back(event);
                    dead.push(conn.remote.clone());
                    continue;
                }
                conn.retries += 1;
                conn.t1.start(now, config.t1);
                match conn.state {
                    LinkState::Connecting => {
                        debug!("Link: T1 expiry, SABM retry {} to {}", conn.retries, conn.remote);
                        sends.push((conn.remote.clone(), Control::Sabm { pf: true }, true));
                    }
                    LinkState::Disconnecting => {
                        sends.push((conn.remote.clone(), Control::Disc { pf: true }, true));
                    }
                    LinkState::Connected => {
                        if let Some((ns, data)) = conn.unacked.front() {
                            debug!("Link: T1 expiry, resending I {} to {}", ns, conn.remote);
                            iframes.push((conn.remote.clone(), *ns, conn.vr, data.clone()));
                        } else {
                            // The idle poll went unanswered.
                            sends.push((conn.remote.clone(), Control::Rr { nr: conn.vr, pf: true }, true));
                        }
                    }
                    LinkState::Disconnected => {}
                }
            }
            if conn.t2.expired(now) {
                conn.t2.stop();
                if conn.state == LinkState::Connected {
                    sends.push((conn.remote.clone(), Control::Rr { nr: conn.vr, pf: false }, false));
                }
            }
            if conn.t3.expired(now) {
                conn.t3.stop();
                if conn.state == LinkState::Connected {
                    debug!("Link: idle poll to {}", conn.remote);
                    conn.t3.start(now, config.t3);
                    conn.t1.start(now, config.t1);
                    sends.push((conn.remote.clone(), Control::Rr { nr: conn.vr, pf: true }, true));
                }
            }
        }
        for remote in dead {
            self.drop_connection(&remote);
        }
        for (remote, control, command) in sends {
            self.send_control(&remote, control, command);
        }
        for (remote, ns, nr, data) in iframes {
            self.queue_iframe(&remote, ns, nr, false, data);
        }
    }

    fn on_sabm(&mut self, src: &Address, pf: bool, now: Instant) {
        let t3 = self.config.t3;
        match self.find_mut(src) {
            Some(conn) if conn.state == LinkState::Connected => {
                // Duplicate SABM on a live link.
                warn!("Link: SABM from {src} while connected, ignoring");
                return;
            }
            Some(conn) => {
                conn.state = LinkState::Connected;
                conn.reset_sequencing();
                conn.t1.stop();
                conn.t3.start(now, t3);
            }
            None => {
                if self.connections.len() >= MAX_CONNECTIONS {
                    warn!("Link: SABM from {src} but connection table full");
                    self.send_control(src, Control::Dm { pf }, false);
                    return;
                }
                let mut conn = Connection::new(src.clone());
                conn.state = LinkState::Connected;
                conn.t3.start(now, t3);
                self.connections.push(conn);
            }
        }
        info!("Link: accepted connection from {src}");
        self.send_control(src, Control::Ua { pf }, false);
        self.events.push_back(LinkEvent::Connected(src.clone()));
    }

    fn on_ua(&mut self, src: &Address, now: Instant) {
        let t3 = self.config.t3;
        let Some(conn) = self.find_mut(src) else {
            debug!("Link: unexpected UA from {src}");
            return;
        };
        match conn.state {
            LinkState::Connecting => {
                conn.state = LinkState::Connected;
                conn.reset_sequencing();
                conn.t1.stop();
                conn.t3.start(now, t3);
                info!("Link: connected to {src}");
                self.events.push_back(LinkEvent::Connected(src.clone()));
            }
            LinkState::Disconnecting => {
                info!("Link: disconnected from {src}");
                self.drop_connection(src);
                self.events.push_back(LinkEvent::Disconnected(src.clone()));
            }
            state => debug!("Link: UA from {src} in {state:?}"),
        }
    }

    fn on_dm(&mut self, src: &Address) {
        let Some(conn) = self.find_mut(src) else {
            return;
        };
        let event = match conn.state {
            LinkState::Connecting => LinkEvent::ConnectFailed(src.clone()),
            _ => LinkEvent::Disconnected(src.clone()),
        };
        warn!("Link: DM from {src}");
        self.drop_connection(src);
        self.events.push_back(event);
    }

    fn on_disc(&mut self, src: &Address, pf: bool) {
        if self.find(src).is_some() {
            info!("Link: DISC from {src}");
            self.drop_connection(src);
            self.send_control(src, Control::Ua { pf }, false);
            self.events.push_back(LinkEvent::Disconnected(src.clone()));
        } else {
            // Not connected to them in the first place.
            self.send_control(src, Control::Dm { pf }, false);
        }
    }

    fn on_frmr(&mut self, src: &Address) {
        if self.find(src).is_some() {
            warn!("Link: FRMR from {src}, tearing down");
            self.drop_connection(src);
            self.events.push_back(LinkEvent::Disconnected(src.clone()));
        }
    }

    fn on_iframe(&mut self, src: &Address, ns: u8, nr: u8, pf: bool, info: &[u8], now: Instant) {
        let t2 = self.config.t2;
        self.ack_to(src, nr, now);
        let Some(conn) = self.find_mut(src) else {
            self.send_control(src, Control::Dm { pf }, false);
            return;
        };
        if conn.state != LinkState::Connected {
            self.send_control(src, Control::Dm { pf }, false);
            return;
        }
        if ns == conn.vr {
            conn.vr = (conn.vr + 1) % 8;
            let vr = conn.vr;
            if pf {
                conn.t2.stop();
                self.send_control(src, Control::Rr { nr: vr, pf: true }, false);
            } else if !conn.t2.running() {
                // Delay the RR a little; more I frames may follow.
                conn.t2.start(now, t2);
            }
            self.events.push_back(LinkEvent::Data(src.clone(), info.to_vec()));
        } else {
            debug!("Link: out of sequence I frame from {src}: N(S)={ns}, V(R)={}", conn.vr);
            let vr = conn.vr;
            conn.t2.stop();
            self.send_control(src, Control::Rej { nr: vr, pf }, false);
        }
    }

    fn on_ack(&mut self, src: &Address, nr: u8, busy: bool, now: Instant) {
        self.ack_to(src, nr, now);
        if let Some(conn) = self.find_mut(src) {
            conn.peer_busy = busy;
        }
    }

    fn on_rej(&mut self, src: &Address, nr: u8, pf: bool, is_command: bool, now: Instant) {
        self.ack_to(src, nr, now);
        let t1 = self.config.t1;
        let Some(conn) = self.find_mut(src) else {
            return;
        };
        if conn.state != LinkState::Connected {
            return;
        }
        debug!("Link: REJ from {src}, resending from N(R)={nr}");
        let resend: Vec<(u8, u8, Vec<u8>)> = conn
            .unacked
            .iter()
            .map(|(ns, data)| (*ns, conn.vr, data.clone()))
            .collect();
        if !resend.is_empty() {
            conn.t1.start(now, t1);
        }
        for (ns, vr, data) in resend {
            self.queue_iframe(src, ns, vr, false, data);
        }
        self.maybe_final(src, pf, is_command);
    }

    fn on_srej(&mut self, src: &Address, nr: u8, now: Instant) {
        let t1 = self.config.t1;
        let Some(conn) = self.find_mut(src) else {
            return;
        };
        if conn.state != LinkState::Connected {
            return;
        }
        let found = conn.unacked.iter().find(|(ns, _)| *ns == nr).map(|(ns, data)| (*ns, conn.vr, data.clone()));
        if let Some((ns, vr, data)) = found {
            conn.t1.start(now, t1);
            self.queue_iframe(src, ns, vr, false, data);
        }
    }

    /// Advance V(A) for an incoming N(R), dropping newly acked frames.
    fn ack_to(&mut self, src: &Address, nr: u8, _now: Instant) {
        let Some(conn) = self.find_mut(src) else {
            return;
        };
        while conn.va != nr {
            match conn.unacked.front() {
                Some((ns, _)) if *ns == conn.va => {
                    conn.unacked.pop_front();
                    conn.va = (conn.va + 1) % 8;
                    conn.retries = 0;
                }
                _ => {
                    debug!("Link: N(R)={nr} from {src} outside window, V(A)={}", conn.va);
                    break;
                }
            }
        }
        if conn.unacked.is_empty() {
            conn.t1.stop();
        }
    }

    /// Answer a command poll with a final RR.
    fn maybe_final(&mut self, src: &Address, pf: bool, is_command: bool) {
        if !(pf && is_command) {
            return;
        }
        let Some(vr) = self.find(src).map(|c| c.vr) else {
            return;
        };
        self.send_control(src, Control::Rr { nr: vr, pf: true }, false);
    }

    fn find(&self, remote: &Address) -> Option<&Connection> {
        self.connections.iter().find(|c| same_station(&c.remote, remote))
    }

    fn find_mut(&mut self, remote: &Address) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| same_station(&c.remote, remote))
    }

    fn drop_connection(&mut self, remote: &Address) {
        self.connections.retain(|c| !same_station(&c.remote, remote));
    }

    fn send_control(&mut self, remote: &Address, control: Control, command: bool) {
        let frame = Frame::control_frame(
            Address { c: command, ..remote.clone() },
            Address { c: !command, ..self.local.clone() },
            control,
        );
        self.tx.push_back(frame);
    }

    fn queue_iframe(&mut self, remote: &Address, ns: u8, nr: u8, pf: bool, data: Vec<u8>) {
        let frame = Frame::iframe(
            Address { c: true, ..remote.clone() },
            Address { c: false, ..self.local.clone() },
            ns,
            nr,
            pf,
            data,
        );
        self.tx.push_back(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ax25::PID_NO_LAYER3;

    fn addr(call: &str) -> Address {
        Address::new(call, 0).unwrap()
    }

    fn tnc(call: &str) -> Tnc {
        Tnc::new(addr(call), LinkConfig::default())
    }

    /// Deliver every queued frame from `from` into `to`.
    fn deliver(from: &mut Tnc, to: &mut Tnc, now: Instant) {
        while let Some(frame) = from.pop_outgoing() {
            to.handle_frame(&frame, now);
        }
    }

    #[test]
    fn connect_handshake() {
        let now = Instant::now();
        let mut a = tnc("M0THC");
        let mut b = tnc("W1AW");

        a.connect(addr("W1AW"), now).unwrap();
        assert_eq!(a.state_of(&addr("W1AW")), Some(LinkState::Connecting));
        deliver(&mut a, &mut b, now);
        assert_eq!(b.state_of(&addr("M0THC")), Some(LinkState::Connected));
        assert_eq!(b.receive(), Some(LinkEvent::Connected(addr("M0THC"))));
        deliver(&mut b, &mut a, now);
        assert_eq!(a.state_of(&addr("W1AW")), Some(LinkState::Connected));
        assert_eq!(a.receive(), Some(LinkEvent::Connected(addr("W1AW"))));
    }

    #[test]
    fn data_transfer_and_ack() {
        let now = Instant::now();
        let mut a = tnc("M0THC");
        let mut b = tnc("W1AW");
        a.connect(addr("W1AW"), now).unwrap();
        deliver(&mut a, &mut b, now);
        deliver(&mut b, &mut a, now);
        let _ = (a.receive(), b.receive());

        a.send(&addr("W1AW"), b"hello", now).unwrap();
        a.send(&addr("W1AW"), b"world", now).unwrap();
        deliver(&mut a, &mut b, now);
        assert_eq!(b.receive(), Some(LinkEvent::Data(addr("M0THC"), b"hello".to_vec())));
        assert_eq!(b.receive(), Some(LinkEvent::Data(addr("M0THC"), b"world".to_vec())));

        // B acks after T2; the ack clears A's unacked queue so a full
        // window is available again.
        let later = now + Duration::from_millis(1500);
        b.tick(later);
        deliver(&mut b, &mut a, later);
        for i in 0..4 {
            a.send(&addr("W1AW"), format!("frame{i}").as_bytes(), later).unwrap();
        }
        assert!(matches!(
            a.send(&addr("W1AW"), b"one too many", later),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn window_never_exceeded() {
        let now = Instant::now();
        let mut a = tnc("M0THC");
        let mut b = tnc("W1AW");
        a.connect(addr("W1AW"), now).unwrap();
        deliver(&mut a, &mut b, now);
        deliver(&mut b, &mut a, now);

        for i in 0..4 {
            a.send(&addr("W1AW"), &[i], now).unwrap();
        }
        assert!(matches!(
            a.send(&addr("W1AW"), &[9], now),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn out_of_sequence_gets_rej() {
        let now = Instant::now();
        let mut b = tnc("W1AW");
        let sabm = Frame::control_frame(
            Address::command("W1AW", 0).unwrap(),
            addr("M0THC"),
            Control::Sabm { pf: true },
        );
        b.handle_frame(&sabm, now);
        while b.pop_outgoing().is_some() {}

        // N(S)=2 when V(R)=0.
        let rogue = Frame::iframe(
            Address::command("W1AW", 0).unwrap(),
            addr("M0THC"),
            2,
            0,
            false,
            b"skip".to_vec(),
        );
        b.handle_frame(&rogue, now);
        let out = b.pop_outgoing().unwrap();
        assert_eq!(out.control, Control::Rej { nr: 0, pf: false });
        // Data was discarded.
        assert_eq!(b.receive(), Some(LinkEvent::Connected(addr("M0THC"))));
        assert_eq!(b.receive(), None);
    }

    #[test]
    fn retry_exhaustion_disconnects_once() {
        let mut now = Instant::now();
        let mut a = tnc("M0THC");
        a.connect(addr("W1AW"), now).unwrap();
        let _ = a.pop_outgoing();

        // 3 retries, then failure on the next expiry.
        for i in 0..3 {
            now += Duration::from_millis(3100);
            a.tick(now);
            assert!(a.pop_outgoing().is_some(), "retry {i} sent nothing");
            assert_eq!(a.state_of(&addr("W1AW")), Some(LinkState::Connecting));
        }
        now += Duration::from_millis(3100);
        a.tick(now);
        assert_eq!(a.receive(), Some(LinkEvent::ConnectFailed(addr("W1AW"))));
        assert_eq!(a.state_of(&addr("W1AW")), None);
        // No further events on later ticks.
        now += Duration::from_millis(3100);
        a.tick(now);
        assert_eq!(a.receive(), None);
    }

    #[test]
    fn t1_retransmits_oldest_unacked() {
        let mut now = Instant::now();
        let mut a = tnc("M0THC");
        let mut b = tnc("W1AW");
        a.connect(addr("W1AW"), now).unwrap();
        deliver(&mut a, &mut b, now);
        deliver(&mut b, &mut a, now);

        a.send(&addr("W1AW"), b"lost", now).unwrap();
        // Drop the frame on the floor.
        let _ = a.pop_outgoing();

        now += Duration::from_millis(3100);
        a.tick(now);
        let resent = a.pop_outgoing().unwrap();
        assert_eq!(resent.control, Control::I { ns: 0, nr: 0, pf: false });
        assert_eq!(resent.info, b"lost");
    }

    #[test]
    fn disconnect_exchange() {
        let now = Instant::now();
        let mut a = tnc("M0THC");
        let mut b = tnc("W1AW");
        a.connect(addr("W1AW"), now).unwrap();
        deliver(&mut a, &mut b, now);
        deliver(&mut b, &mut a, now);
        let _ = (a.receive(), b.receive());

        a.disconnect(&addr("W1AW"), now).unwrap();
        assert_eq!(a.state_of(&addr("W1AW")), Some(LinkState::Disconnecting));
        deliver(&mut a, &mut b, now);
        assert_eq!(b.receive(), Some(LinkEvent::Disconnected(addr("M0THC"))));
        assert_eq!(b.state_of(&addr("M0THC")), None);
        deliver(&mut b, &mut a, now);
        assert_eq!(a.receive(), Some(LinkEvent::Disconnected(addr("W1AW"))));
        assert_eq!(a.state_of(&addr("W1AW")), None);
    }

    #[test]
    fn send_requires_connection() {
        let now = Instant::now();
        let mut a = tnc("M0THC");
        assert!(matches!(
            a.send(&addr("W1AW"), b"no link", now),
            Err(Error::StateViolation(_))
        ));
    }

    #[test]
    fn connection_table_bounded() {
        let now = Instant::now();
        let mut a = tnc("M0THC");
        for i in 0..MAX_CONNECTIONS {
            a.connect(Address::new("CALL", i as u8 % 16).unwrap(), now).unwrap();
        }
        assert!(matches!(
            a.connect(addr("EXTRA"), now),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn sequence_numbers_stay_modulo_8() {
        let mut now = Instant::now();
        let mut a = tnc("M0THC");
        let mut b = tnc("W1AW");
        a.connect(addr("W1AW"), now).unwrap();
        deliver(&mut a, &mut b, now);
        deliver(&mut b, &mut a, now);

        for i in 0u32..20 {
            a.send(&addr("W1AW"), &i.to_le_bytes(), now).unwrap();
            deliver(&mut a, &mut b, now);
            now += Duration::from_millis(1100);
            b.tick(now);
            deliver(&mut b, &mut a, now);
        }
        // 20 data events delivered in order.
        let mut count: u32 = 0;
        while let Some(event) = b.receive() {
            if let LinkEvent::Data(_, data) = event {
                assert_eq!(data, count.to_le_bytes().to_vec());
                count += 1;
            }
        }
        assert_eq!(count, 20u32);
    }

    #[test]
    fn ui_datagram_delivered() {
        let now = Instant::now();
        let mut a = tnc("M0THC");
        let mut b = tnc("W1AW");
        a.send_ui(&addr("W1AW"), &[addr("WIDE1")], PID_NO_LAYER3, b"beacon").unwrap();
        deliver(&mut a, &mut b, now);
        assert_eq!(b.receive(), Some(LinkEvent::UiData(addr("M0THC"), b"beacon".to_vec())));
    }
}
