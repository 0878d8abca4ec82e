use serde::{Deserialize, Serialize};
use std::fmt;

const UNSPECIFIED_STR: &str = "unspecified";

/// Kind of media carried by a rendition.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Unspecified,
    Audio,
    Video,
    Data,
}

impl From<&str> for MediaKind {
    fn from(raw: &str) -> Self {
        match raw {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            "data" => MediaKind::Data,
            _ => MediaKind::Unspecified,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Data => "data",
            MediaKind::Unspecified => UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// Snapshot of network and media quality for one stream.
///
/// Every field is optional since transports surface different subsets of
/// their statistics. Counters (`packets_lost`, `nack_count`,
/// `key_frames_decoded`, ...) are cumulative, as in the W3C
/// `RTCInboundRtpStreamStats` dictionary, so a host can deserialize its
/// stats JSON straight into this type.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkReport {
    /// Packet loss over the last reporting interval, in percent.
    pub loss_perc: Option<f64>,

    /// Cumulative number of lost packets.
    pub packets_lost: Option<u64>,

    /// Cumulative number of NACK packets sent.
    pub nack_count: Option<u64>,

    /// Cumulative number of packets discarded by the jitter buffer.
    pub packets_discarded: Option<u64>,

    /// Cumulative number of retransmitted packets.
    pub retransmitted_packets: Option<u64>,

    /// Interarrival jitter in seconds.
    pub jitter: Option<f64>,

    /// Cumulative number of key frames decoded (video only).
    pub key_frames_decoded: Option<u64>,

    /// Round trip time in seconds.
    pub rtt: Option<f64>,
}

impl NetworkReport {
    /// Loss percentage, treating an absent or negative value as no loss.
    pub fn loss(&self) -> f64 {
        self.loss_perc.filter(|l| l.is_finite()).unwrap_or(0.0).max(0.0)
    }

    pub fn with_loss_perc(mut self, loss_perc: f64) -> Self {
        self.loss_perc = Some(loss_perc);
        self
    }

    pub fn with_packets_lost(mut self, packets_lost: u64) -> Self {
        self.packets_lost = Some(packets_lost);
        self
    }

    pub fn with_nack_count(mut self, nack_count: u64) -> Self {
        self.nack_count = Some(nack_count);
        self
    }

    pub fn with_key_frames_decoded(mut self, key_frames_decoded: u64) -> Self {
        self.key_frames_decoded = Some(key_frames_decoded);
        self
    }

    pub fn with_rtt(mut self, rtt: f64) -> Self {
        self.rtt = Some(rtt);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }
}
