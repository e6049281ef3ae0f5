use std::sync::Arc;

use thiserror::Error;

use crate::cache::ReadingCache;
use crate::frame::{decode_frame, FrameError, PeerFrame};

/// Operating mode reported by the radio subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Off,
    Station,
    AccessPoint,
    Mixed,
}

impl RadioMode {
    /// The link rides whatever mode (and channel) the radio already uses;
    /// only a radio that is off cannot carry peer traffic.
    pub fn usable(self) -> bool {
        self != RadioMode::Off
    }
}

/// Lifecycle of the wireless ingestion subsystem. `Disabled` is terminal:
/// a failed bring-up is logged by the caller and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Uninitialized,
    Initializing,
    Active,
    Disabled,
}

/// Failure surfaced by a transport operation, as reported by the platform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportInitError {
    /// The transport was already brought up by an earlier incarnation.
    #[error("transport already active")]
    AlreadyActive,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("radio is not ready: {0}")]
    RadioUnavailable(TransportError),
    #[error("radio mode {0:?} cannot carry peer traffic")]
    RadioUnusable(RadioMode),
    #[error("transport init failed: {0}")]
    InitFailed(TransportInitError),
    #[error("transport recycle failed: {0}")]
    RecycleFailed(TransportError),
    #[error("transport reinit failed: {0}")]
    ReinitFailed(TransportInitError),
    #[error("receive callback registration failed: {0}")]
    RegistrationFailed(TransportError),
}

/// The peer-to-peer transport collaborator: radio mode query, station
/// address query (diagnostics only), init/deinit, and receive-callback
/// registration. ESP-NOW on device, a UDP stand-in on the host.
pub trait PeerTransport {
    fn radio_mode(&mut self) -> Result<RadioMode, TransportError>;

    /// Local station address, logged for diagnostics; never used for
    /// access control.
    fn station_mac(&mut self) -> Result<[u8; 6], TransportError>;

    fn init(&mut self) -> Result<(), TransportInitError>;

    fn deinit(&mut self) -> Result<(), TransportError>;

    /// Install `receiver` as the frame sink. The transport calls
    /// `FrameReceiver::handle_frame` for every delivered frame and logs
    /// the outcome together with the sender address.
    fn register_receiver(&mut self, receiver: Arc<FrameReceiver>) -> Result<(), TransportError>;
}

/// Receive-callback contract shared by every transport: an exact-length
/// frame updates the cache, anything else is rejected with the cache
/// untouched.
#[derive(Debug)]
pub struct FrameReceiver {
    cache: Arc<ReadingCache>,
}

impl FrameReceiver {
    pub fn new(cache: Arc<ReadingCache>) -> Self {
        Self { cache }
    }

    /// Validate and commit one frame. Returns the decoded frame so the
    /// caller can log it alongside the sender address, or the rejection
    /// for the caller to log as a warning.
    pub fn handle_frame(&self, payload: &[u8], now_ms: u64) -> Result<PeerFrame, FrameError> {
        let frame = decode_frame(payload)?;
        self.cache
            .update(frame.temperature, frame.humidity, now_ms);
        Ok(frame)
    }
}

/// Drives a transport through the one-shot bring-up sequence and holds it
/// for the life of the process.
pub struct PeerLink<T: PeerTransport> {
    transport: T,
    state: LinkState,
}

impl<T: PeerTransport> PeerLink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: LinkState::Uninitialized,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn station_mac(&mut self) -> Option<[u8; 6]> {
        self.transport.station_mac().ok()
    }

    /// Run the init sequence: check the radio is usable, init the
    /// transport (tolerating "already active" by recycling it exactly
    /// once), register the receive callback. Any unrecoverable failure
    /// lands in `Disabled` and ingestion simply never occurs, with no crash
    /// and no retry loop. The bounded wait for radio readiness is the caller's
    /// concern and happens before this is invoked.
    pub fn bring_up(&mut self, receiver: Arc<FrameReceiver>) -> Result<(), LinkError> {
        self.state = LinkState::Initializing;

        let mode = match self.transport.radio_mode() {
            Ok(mode) => mode,
            Err(err) => return self.disable(LinkError::RadioUnavailable(err)),
        };
        if !mode.usable() {
            return self.disable(LinkError::RadioUnusable(mode));
        }

        match self.transport.init() {
            Ok(()) => {}
            Err(TransportInitError::AlreadyActive) => {
                if let Err(err) = self.transport.deinit() {
                    return self.disable(LinkError::RecycleFailed(err));
                }
                if let Err(err) = self.transport.init() {
                    return self.disable(LinkError::ReinitFailed(err));
                }
            }
            Err(err) => return self.disable(LinkError::InitFailed(err)),
        }

        if let Err(err) = self.transport.register_receiver(receiver) {
            let _ = self.transport.deinit();
            return self.disable(LinkError::RegistrationFailed(err));
        }

        self.state = LinkState::Active;
        Ok(())
    }

    fn disable(&mut self, err: LinkError) -> Result<(), LinkError> {
        self.state = LinkState::Disabled;
        Err(err)
    }
}
