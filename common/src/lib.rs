pub mod cache;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod link;
pub mod query;
pub mod types;

pub use cache::{Reading, ReadingCache, ReadingSource};
pub use config::StationConfig;
pub use frame::{decode_frame, format_mac, FrameError, PeerFrame, PEER_FRAME_LEN};
pub use ingest::{
    apply_observation, parse_observation, IngestError, Observation, PartialUpdatePolicy,
};
pub use link::{
    FrameReceiver, LinkError, LinkState, PeerLink, PeerTransport, RadioMode, TransportError,
    TransportInitError,
};
pub use query::{build_report, format_age};
pub use types::{IngestAck, IngestErrorBody, TemperatureReport};
