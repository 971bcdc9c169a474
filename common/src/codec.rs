use bincode::Options;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Upper bound for one encoded request or response.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Largest READ reply or WRITE payload. Servers clamp READ counts to it and
/// clients refuse to send bigger WRITEs, so no data frame can exceed
/// [`MAX_MESSAGE_SIZE`].
pub const MAX_IO_SIZE: u32 = 4 * 1024 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_SIZE as u64)
}

pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, bincode::Error> {
    options().serialize(msg)
}

pub fn decode_message<T: DeserializeOwned>(buf: &[u8]) -> Result<T, bincode::Error> {
    options().deserialize(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FileHandle, NfsRequest, NfsResponse, StableHow, WriteVerifier};

    #[test]
    fn test_write_request_survives_the_wire() {
        let req = NfsRequest::Write {
            handle: FileHandle::from_ino(42),
            offset: 7,
            count: 5,
            data: b"hello".to_vec(),
            stable: StableHow::Unstable,
        };
        let buf = encode_message(&req).unwrap();
        let back: NfsRequest = decode_message(&buf).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_largest_write_fits_in_a_frame() {
        let req = NfsRequest::Write {
            handle: FileHandle::from_ino(u64::MAX),
            offset: u64::MAX,
            count: MAX_IO_SIZE,
            data: vec![0u8; MAX_IO_SIZE as usize],
            stable: StableHow::DataSync,
        };
        assert!(encode_message(&req).unwrap().len() < MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let resp = NfsResponse::Committed {
            verifier: WriteVerifier(99),
        };
        let buf = encode_message(&resp).unwrap();
        assert!(decode_message::<NfsResponse>(&buf[..buf.len() - 1]).is_err());
    }
}
