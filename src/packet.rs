use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Every frame understood by the controller is exactly this long,
/// including the trailing checksum byte.
pub const FRAME_LEN: usize = 20;
const BODY_LEN: usize = FRAME_LEN - 1;

/// `33 05 04 lo hi` leaves this much room for a mode suffix
pub const MAX_MODE_SUFFIX: usize = BODY_LEN - 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame body is {len} bytes, but at most {BODY_LEN} fit before the checksum")]
    BodyTooLong { len: usize },
    #[error("mode suffix is {len} bytes, but a scene code frame has room for {MAX_MODE_SUFFIX}")]
    ModeSuffixTooLong { len: usize },
    #[error(
        "payload of {len} bytes needs {lines} lines, \
         but a single byte line count can address at most 255"
    )]
    SizeExceeded { len: usize, lines: usize },
}

#[derive(Clone, PartialEq, Eq, Default)]
pub struct HexBytes(Vec<u8>);

impl std::fmt::Debug for HexBytes {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_fmt(format_args!("{:02X?}", self.0))
    }
}

impl std::ops::Deref for HexBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for HexBytes {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

/// Rule tables spell byte strings as hex; either case is accepted.
impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as Deserializer<'de>>::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;
        let text = String::deserialize(deserializer)?;
        data_encoding::HEXLOWER_PERMISSIVE
            .decode(text.trim().as_bytes())
            .map(Self)
            .map_err(|e| D::Error::custom(format!("invalid hex {text:?}: {e}")))
    }
}

pub fn calculate_checksum(data: &[u8]) -> u8 {
    let mut checksum: u8 = 0;
    for &b in data {
        checksum = checksum ^ b;
    }
    checksum
}

/// A complete 20 byte frame: 19 bytes of body followed by the
/// XOR of those 19 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl std::fmt::Debug for Frame {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_fmt(format_args!("{:02X?}", self.0))
    }
}

impl Frame {
    /// Zero-pads `body` to 19 bytes and appends the checksum.
    pub fn finish(body: &[u8]) -> Result<Self, PacketError> {
        if body.len() > BODY_LEN {
            return Err(PacketError::BodyTooLong { len: body.len() });
        }
        let mut data = [0u8; FRAME_LEN];
        data[..body.len()].copy_from_slice(body);
        Ok(Self::seal(data))
    }

    fn seal(mut data: [u8; FRAME_LEN]) -> Self {
        data[BODY_LEN] = calculate_checksum(&data[..BODY_LEN]);
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn header(&self) -> u8 {
        self.0[0]
    }

    pub fn sequence(&self) -> u8 {
        self.0[1]
    }

    /// The 17 bytes between the sequence byte and the checksum
    pub fn payload(&self) -> &[u8] {
        &self.0[2..BODY_LEN]
    }

    pub fn parse_bytes(data: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            data.len() == FRAME_LEN,
            "frame must contain {FRAME_LEN} bytes, have {}",
            data.len()
        );
        let checksum = calculate_checksum(&data[0..BODY_LEN]);
        anyhow::ensure!(
            checksum == data[BODY_LEN],
            "frame checksum is invalid. Expected {} but got {checksum}",
            data[BODY_LEN]
        );
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(data);
        Ok(Self(frame))
    }

    pub fn parse_base64<B: AsRef<[u8]>>(encoded: B) -> anyhow::Result<Self> {
        let decoded = data_encoding::BASE64.decode(encoded.as_ref())?;
        Self::parse_bytes(&decoded)
    }

    pub fn base64(&self) -> String {
        data_encoding::BASE64.encode(&self.0)
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as Deserializer<'de>>::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;
        let text = String::deserialize(deserializer)?;
        Self::parse_base64(&text).map_err(|e| D::Error::custom(format!("{e:#}")))
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.base64())
    }
}

/// Position of a line within a multi-line sequence.
/// The final line carries `0xff` in place of its index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineMarker {
    Index(u8),
    Last,
}

pub const LAST_LINE: u8 = 0xff;

impl LineMarker {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Index(i) => i,
            Self::Last => LAST_LINE,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        if b == LAST_LINE {
            Self::Last
        } else {
            Self::Index(b)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LanPacket {
    Generic(HexBytes),
    SetPower(bool),
    SetSceneCode {
        code: u16,
        mode_suffix: HexBytes,
    },
    MultiLine {
        prefix: u8,
        line: LineMarker,
        data: HexBytes,
    },
}

fn btoi(on: bool) -> u8 {
    if on {
        1
    } else {
        0
    }
}

impl LanPacket {
    pub fn into_frame(self) -> Result<Frame, PacketError> {
        match self {
            Self::Generic(HexBytes(v)) => Frame::finish(&v),
            Self::SetPower(on) => Frame::finish(&[0x33, 0x01, btoi(on)]),
            Self::SetSceneCode { code, mode_suffix } => {
                if mode_suffix.len() > MAX_MODE_SUFFIX {
                    return Err(PacketError::ModeSuffixTooLong {
                        len: mode_suffix.len(),
                    });
                }
                let [lo, hi] = code.to_le_bytes();
                let mut body = vec![0x33, 0x05, 0x04, lo, hi];
                body.extend_from_slice(&mode_suffix);
                Frame::finish(&body)
            }
            Self::MultiLine { prefix, line, data } => {
                let mut body = Vec::with_capacity(BODY_LEN);
                body.push(prefix);
                body.push(line.to_byte());
                body.extend_from_slice(&data);
                Frame::finish(&body)
            }
        }
    }

    /// Recognizes the frames that scene compilation produces.
    /// A scene code frame's suffix is reported with its zero padding
    /// trimmed, as the two cannot be told apart on the wire.
    pub fn classify(frame: &Frame, multiline_prefix: u8) -> Self {
        let body = &frame.as_bytes()[0..BODY_LEN];
        match body {
            [0x33, 0x01, on @ (0 | 1), rest @ ..] if rest.iter().all(|&b| b == 0) => {
                Self::SetPower(*on != 0)
            }
            [0x33, 0x05, 0x04, lo, hi, suffix @ ..] => {
                let len = suffix.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                Self::SetSceneCode {
                    code: u16::from_le_bytes([*lo, *hi]),
                    mode_suffix: suffix[..len].into(),
                }
            }
            [prefix, seq, data @ ..] if *prefix == multiline_prefix => Self::MultiLine {
                prefix: *prefix,
                line: LineMarker::from_byte(*seq),
                data: data.into(),
            },
            _ => Self::Generic(frame.as_bytes()[..].into()),
        }
    }
}

/// `33 01 01`: switch the device on before sending scene data
pub fn power_on_frame() -> Frame {
    let mut data = [0u8; FRAME_LEN];
    data[..3].copy_from_slice(&[0x33, 0x01, 0x01]);
    Frame::seal(data)
}

pub fn scene_code_frame(code: u16, mode_suffix: &[u8]) -> Result<Frame, PacketError> {
    LanPacket::SetSceneCode {
        code,
        mode_suffix: mode_suffix.into(),
    }
    .into_frame()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_is_xor() {
        assert_eq!(calculate_checksum(&[]), 0);
        assert_eq!(calculate_checksum(&[0x5a]), 0x5a);
        assert_eq!(calculate_checksum(&[0x33, 0x01, 0x01]), 0x33);
        assert_eq!(calculate_checksum(&[0xff, 0xff]), 0);
        let data = [0xa3, 0x00, 0x01, 0x02, 0x02, 0x10, 0x80];
        let expected = data.iter().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(calculate_checksum(&data), expected);
    }

    #[test]
    fn scene_code_frame_layout() {
        let frame = scene_code_frame(1234, &[]).unwrap();
        let mut expected = vec![0x33, 0x05, 0x04, 0xd2, 0x04];
        expected.resize(19, 0);
        expected.push(0x33 ^ 0x05 ^ 0x04 ^ 0xd2 ^ 0x04);
        assert_eq!(frame.as_bytes()[..], expected[..]);
        assert_eq!(frame.base64(), "MwUE0gQAAAAAAAAAAAAAAAAAAOQ=");
    }

    #[test]
    fn scene_code_frame_with_suffix() {
        let frame = scene_code_frame(0x0102, &[0x09, 0x01]).unwrap();
        assert_eq!(
            frame.as_bytes()[0..8],
            [0x33, 0x05, 0x04, 0x02, 0x01, 0x09, 0x01, 0x00]
        );

        let max = [0x11u8; MAX_MODE_SUFFIX];
        let frame = scene_code_frame(7, &max).unwrap();
        assert_eq!(frame.as_bytes()[5..19], max);

        assert_eq!(
            scene_code_frame(7, &[0u8; MAX_MODE_SUFFIX + 1]),
            Err(PacketError::ModeSuffixTooLong { len: 15 })
        );
    }

    #[test]
    fn power_on_layout() {
        let frame = power_on_frame();
        let mut expected = vec![0x33, 0x01, 0x01];
        expected.resize(19, 0);
        expected.push(0x33);
        assert_eq!(frame.as_bytes()[..], expected[..]);
        assert_eq!(frame.base64(), "MwEBAAAAAAAAAAAAAAAAAAAAADM=");
    }

    #[test]
    fn finish_rejects_long_body() {
        assert_eq!(
            Frame::finish(&[0u8; 20]),
            Err(PacketError::BodyTooLong { len: 20 })
        );
        assert!(Frame::finish(&[1u8; 19]).is_ok());
    }

    #[test]
    fn parse_validates() {
        let frame = power_on_frame();
        assert_eq!(Frame::parse_base64(frame.base64()).unwrap(), frame);

        let mut bad = *frame.as_bytes();
        bad[19] ^= 1;
        assert!(Frame::parse_bytes(&bad).is_err());
        assert!(Frame::parse_bytes(&bad[..19]).is_err());
        assert!(Frame::parse_base64("not base64").is_err());
    }

    #[test]
    fn hex_bytes_from_json() {
        let v: Vec<HexBytes> = serde_json::from_str(r#"["a3", "0A0b", ""]"#).unwrap();
        assert_eq!(*v[0], [0xa3]);
        assert_eq!(*v[1], [0x0a, 0x0b]);
        assert!(v[2].is_empty());
        assert!(serde_json::from_str::<HexBytes>(r#""abc""#).is_err());
    }

    #[test]
    fn classify_frames() {
        let input = [
            "MwEBAAAAAAAAAAAAAAAAAAAAADM=",
            "MwUE0gQAAAAAAAAAAAAAAAAAAOQ=",
            "owABAgEFBgcIAAAAAAAAAAAAAK0=",
            "o/8BAgEFBgcIAAAAAAAAAAAAAFI=",
            "qhIAAAAAAAAAAAAAAAAAAAAAALg=",
        ];

        let decoded: Vec<_> = input
            .iter()
            .map(|s| LanPacket::classify(&Frame::parse_base64(s).unwrap(), 0xa3))
            .collect();

        k9::snapshot!(
            decoded,
            "
[
    SetPower(
        true,
    ),
    SetSceneCode {
        code: 1234,
        mode_suffix: [],
    },
    MultiLine {
        prefix: 163,
        line: Index(
            0,
        ),
        data: [01, 02, 01, 05, 06, 07, 08, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00],
    },
    MultiLine {
        prefix: 163,
        line: Last,
        data: [01, 02, 01, 05, 06, 07, 08, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00],
    },
    Generic(
        [AA, 12, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, 00, B8],
    ),
]
"
        );
    }

    #[test]
    fn classify_round_trip() {
        for packet in [
            LanPacket::SetPower(false),
            LanPacket::SetSceneCode {
                code: 42,
                mode_suffix: vec![0x01, 0x02].into(),
            },
            LanPacket::MultiLine {
                prefix: 0xa4,
                line: LineMarker::Index(3),
                data: vec![9u8; 17].into(),
            },
        ] {
            let frame = packet.clone().into_frame().unwrap();
            assert_eq!(LanPacket::classify(&frame, 0xa4), packet);
        }
    }
}
