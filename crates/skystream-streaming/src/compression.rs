//! Gzip wire framing for broadcast frames.
//!
//! Each snapshot is compressed exactly once per broadcast and the same
//! frame is handed to every subscriber; per-recipient compression would
//! scale with the session count and is deliberately avoided. Gzip at the
//! default level is the codec because browser clients inflate frames with
//! `DecompressionStream('gzip')`.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Compress a snapshot payload into a wire frame.
pub fn compress_frame(payload: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(payload.len() / 2),
        Compression::default(),
    );
    encoder.write_all(payload)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Inflate a wire frame back into the snapshot payload.
pub fn decompress_frame(frame: &[u8]) -> std::io::Result<Bytes> {
    let mut decoder = GzDecoder::new(frame);
    let mut payload = Vec::new();
    decoder.read_to_end(&mut payload)?;
    Ok(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_inflates_back_to_payload() {
        let payload = br#"[{"icao24":"4b1805","callsign":"SWR23N"}]"#;
        let frame = compress_frame(payload).unwrap();
        assert_eq!(decompress_frame(&frame).unwrap().as_ref(), payload);
    }

    #[test]
    fn repetitive_snapshots_shrink() {
        let payload = br#"{"velocity":212.4}"#.repeat(200);
        let frame = compress_frame(&payload).unwrap();
        assert!(frame.len() < payload.len() / 4);
    }

    #[test]
    fn framing_is_deterministic() {
        // Every recipient of one broadcast gets byte-identical frames, and
        // re-encoding the same snapshot must not vary (no embedded mtime).
        let payload = br#"[{"icao24":"abc123"}]"#;
        assert_eq!(
            compress_frame(payload).unwrap(),
            compress_frame(payload).unwrap()
        );
    }

    #[test]
    fn garbage_frame_is_rejected() {
        assert!(decompress_frame(b"definitely not gzip").is_err());
    }
}
