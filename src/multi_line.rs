//! Multi-line (`ptReal`) scene data.
//!
//! A scene payload is prefixed with a three byte header
//! (`01`, line count, effect type) and then split across as many
//! frames as needed, each carrying 17 bytes. Lines are numbered
//! from zero, except for the final line which is always marked
//! with `0xff`, even when it is the only one.

use crate::packet::{Frame, LanPacket, LineMarker, PacketError};

/// Data bytes carried by each line
pub const LINE_CAPACITY: usize = 17;
const HEADER_MARKER: u8 = 0x01;
const HEADER_LEN: usize = 3;
/// The line count is sent as a single byte
pub const MAX_LINES: usize = u8::MAX as usize;
pub const MAX_PAYLOAD: usize = MAX_LINES * LINE_CAPACITY - HEADER_LEN;

pub fn line_count(payload_len: usize) -> usize {
    (payload_len + HEADER_LEN).div_ceil(LINE_CAPACITY)
}

pub fn chunk_frames(
    payload: &[u8],
    effect_type: u8,
    multiline_prefix: u8,
) -> Result<Vec<Frame>, PacketError> {
    let lines = line_count(payload.len());
    if payload.len() > MAX_PAYLOAD {
        return Err(PacketError::SizeExceeded {
            len: payload.len(),
            lines,
        });
    }
    let count = lines as u8;

    let mut framed = Vec::with_capacity(HEADER_LEN + payload.len());
    framed.extend_from_slice(&[HEADER_MARKER, count, effect_type]);
    framed.extend_from_slice(payload);

    let mut frames = Vec::with_capacity(lines);
    for i in 0..count {
        let start = usize::from(i) * LINE_CAPACITY;
        let end = framed.len().min(start + LINE_CAPACITY);
        let line = if i == count - 1 {
            LineMarker::Last
        } else {
            LineMarker::Index(i)
        };
        frames.push(
            LanPacket::MultiLine {
                prefix: multiline_prefix,
                line,
                data: framed[start..end].into(),
            }
            .into_frame()?,
        );
    }

    Ok(frames)
}

#[derive(Debug, PartialEq, Eq)]
pub struct ReassembledPayload {
    pub effect_type: u8,
    /// Includes whatever zero padding the final line carried
    pub data: Vec<u8>,
}

/// Reverses `chunk_frames`, checking that the lines are numbered
/// in order and that the header agrees with the number of lines.
pub fn reassemble(frames: &[Frame], multiline_prefix: u8) -> anyhow::Result<ReassembledPayload> {
    anyhow::ensure!(!frames.is_empty(), "no multi-line frames");
    anyhow::ensure!(
        frames.len() <= MAX_LINES,
        "{} lines is more than can be addressed",
        frames.len()
    );

    let mut framed = Vec::with_capacity(frames.len() * LINE_CAPACITY);
    for (i, frame) in frames.iter().enumerate() {
        anyhow::ensure!(
            frame.header() == multiline_prefix,
            "line {i} has prefix {:#04x}, expected {multiline_prefix:#04x}",
            frame.header()
        );
        let expected = if i == frames.len() - 1 {
            LineMarker::Last
        } else {
            LineMarker::Index(i as u8)
        };
        let actual = LineMarker::from_byte(frame.sequence());
        anyhow::ensure!(
            actual == expected,
            "line {i} is marked {actual:?}, expected {expected:?}"
        );
        framed.extend_from_slice(frame.payload());
    }

    match framed.as_slice() {
        [HEADER_MARKER, count, effect_type, data @ ..] => {
            anyhow::ensure!(
                usize::from(*count) == frames.len(),
                "header declares {count} lines but {} were supplied",
                frames.len()
            );
            Ok(ReassembledPayload {
                effect_type: *effect_type,
                data: data.to_vec(),
            })
        }
        _ => anyhow::bail!("multi-line header is missing, got {framed:02x?}"),
    }
}
