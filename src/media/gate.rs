use serde::Serialize;

use crate::media::bitstream;
use crate::media::types::Codec;

/// Cadence of the "still waiting for a keyframe" diagnostic.
const DROP_LOG_EVERY: u64 = 50;
/// Cadence of the forwarding progress diagnostic once active.
const FORWARD_LOG_EVERY: u64 = 100;

/// Session lifecycle phase. Moves Priming -> Active -> Stopped, never
/// backward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Priming,
    Active,
    Stopped,
}

/// Outcome of offering a raw video frame to the gate.
#[derive(Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// No decodable starting point yet; the frame must not reach the sink.
    Dropped,
    /// First qualifying frame. The sink should be started for `codec` and
    /// fed this very frame.
    Primed(Codec),
    /// Gate is active; forward without re-inspection.
    Forward,
    /// Gate has been stopped; discard.
    Rejected,
}

/// Withholds video frames until the bitstream offers a decodable starting
/// point (keyframe with a known codec), then forwards everything.
pub struct PrimingGate {
    phase: Phase,
    codec: Codec,
    frame_count: u64,
    dropped_count: u64,
}

impl PrimingGate {
    pub fn new() -> Self {
        Self {
            phase: Phase::Priming,
            codec: Codec::Unknown,
            frame_count: 0,
            dropped_count: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Total raw video frames seen, forwarded or not.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames withheld while priming.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Offer one raw video frame. The transition to Active happens exactly
    /// once, on the first frame carrying a qualifying keyframe NAL; that
    /// frame itself is forwarded.
    pub fn offer(&mut self, payload: &[u8]) -> GateDecision {
        match self.phase {
            Phase::Stopped => GateDecision::Rejected,
            Phase::Active => {
                self.frame_count += 1;
                if self.frame_count % FORWARD_LOG_EVERY == 0 {
                    log::debug!("gate: {} video frames forwarded", self.frame_count);
                }
                GateDecision::Forward
            }
            Phase::Priming => {
                self.frame_count += 1;
                let (keyframe, codec) = bitstream::inspect(payload);
                if !keyframe || !codec.is_known() {
                    self.dropped_count += 1;
                    if self.dropped_count % DROP_LOG_EVERY == 0 {
                        log::info!(
                            "gate: waiting for keyframe, {} frames dropped",
                            self.dropped_count
                        );
                    }
                    return GateDecision::Dropped;
                }

                self.codec = codec;
                self.phase = Phase::Active;
                log::info!("gate: detected codec {}, priming complete", codec);
                GateDecision::Primed(codec)
            }
        }
    }

    /// Terminal; no further frames are forwarded.
    pub fn stop(&mut self) {
        self.phase = Phase::Stopped;
    }
}

impl Default for PrimingGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NON_KEY: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x06, 0x05, 0x04, 0x00];
    const H264_KEY: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E];

    #[test]
    fn test_drops_until_first_keyframe() {
        let mut gate = PrimingGate::new();

        // First keyframe at 1-based index k = 4: exactly k-1 drops
        for _ in 0..3 {
            assert_eq!(gate.offer(NON_KEY), GateDecision::Dropped);
        }
        assert_eq!(gate.dropped_count(), 3);
        assert_eq!(gate.phase(), Phase::Priming);

        assert_eq!(gate.offer(H264_KEY), GateDecision::Primed(Codec::H264));
        assert_eq!(gate.phase(), Phase::Active);
        assert_eq!(gate.codec(), Codec::H264);
        assert_eq!(gate.dropped_count(), 3);
    }

    #[test]
    fn test_forwards_everything_once_active() {
        let mut gate = PrimingGate::new();
        assert_eq!(gate.offer(H264_KEY), GateDecision::Primed(Codec::H264));

        // Non-keyframe payloads are no longer inspected
        for _ in 0..5 {
            assert_eq!(gate.offer(NON_KEY), GateDecision::Forward);
        }
        assert_eq!(gate.frame_count(), 6);
        assert_eq!(gate.dropped_count(), 0);
    }

    #[test]
    fn test_primes_exactly_once() {
        let mut gate = PrimingGate::new();
        assert_eq!(gate.offer(H264_KEY), GateDecision::Primed(Codec::H264));
        // A second keyframe is an ordinary forward, not a re-prime
        assert_eq!(gate.offer(H264_KEY), GateDecision::Forward);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let mut gate = PrimingGate::new();
        gate.stop();
        assert_eq!(gate.phase(), Phase::Stopped);
        assert_eq!(gate.offer(H264_KEY), GateDecision::Rejected);
        assert_eq!(gate.phase(), Phase::Stopped);
    }

    #[test]
    fn test_hevc_priming() {
        let mut gate = PrimingGate::new();
        let hevc_key = [0x00, 0x00, 0x01, 0x40, 0x01, 0x0C, 0x01, 0xFF];
        assert_eq!(gate.offer(&hevc_key), GateDecision::Primed(Codec::Hevc));
        assert_eq!(gate.codec(), Codec::Hevc);
    }
}
