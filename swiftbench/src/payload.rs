//! Generation and verification of object contents.
//!
//! Every worker generates its own [`Payload`] once, uploads it on each put and, if verification is
//! enabled, checks every downloaded chunk against it with a [`Verifier`]. Payloads are never shared
//! between workers.

use std::io::{self, Cursor, Read};
use std::{fmt, str::FromStr};

use bytes::Bytes;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use swiftbench_client::DataSource;

/// Strategy used to fill objects under test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum DataMode {
    /// Repetitions of a short text naming the worker, easily identifiable in stored objects.
    #[default]
    #[serde(rename = "simple-text")]
    SimpleText,
    /// Null bytes, synthesized on demand instead of being held in memory.
    #[serde(rename = "zeroes", alias = "all-zero")]
    AllZero,
    /// Bytes read from the operating system's entropy source.
    #[serde(rename = "random", alias = "pseudo-random")]
    PseudoRandom,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataMode::SimpleText => "simple-text",
            DataMode::AllZero => "zeroes",
            DataMode::PseudoRandom => "random",
        })
    }
}

/// The data mode parse error.
#[derive(Clone, Debug)]
pub struct DataModeParseError(String);

impl fmt::Display for DataModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as data mode: expected one of "simple-text", "zeroes", "random""#,
            self.0
        )
    }
}

impl std::error::Error for DataModeParseError {}

impl FromStr for DataMode {
    type Err = DataModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            s if s.eq_ignore_ascii_case("simple-text") => DataMode::SimpleText,
            s if s.eq_ignore_ascii_case("zeroes") => DataMode::AllZero,
            s if s.eq_ignore_ascii_case("zeros") => DataMode::AllZero,
            s if s.eq_ignore_ascii_case("all-zero") => DataMode::AllZero,
            s if s.eq_ignore_ascii_case("random") => DataMode::PseudoRandom,
            s if s.eq_ignore_ascii_case("pseudo-random") => DataMode::PseudoRandom,
            s => return Err(DataModeParseError(s.into())),
        };

        Ok(result)
    }
}

/// Errors raised while generating or verifying a payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The system entropy source could not be read.
    ///
    /// This is an environment failure that aborts the whole run rather than a single worker.
    #[error("failed to read the system entropy source")]
    Entropy(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The payload buffer could not be allocated.
    #[error("cannot allocate a payload of {0} bytes")]
    Alloc(u64),
    /// More data was received than the object should contain.
    #[error("received data extends past the expected {expected} bytes")]
    Overrun {
        /// The expected object size.
        expected: u64,
    },
    /// Received data differs from the payload.
    #[error("received data differs from the expected data at byte {0}")]
    Mismatch(u64),
    /// The download ended before the whole object was received.
    #[error("received {received} of {expected} expected bytes")]
    Truncated {
        /// Number of bytes received.
        received: u64,
        /// The expected object size.
        expected: u64,
    },
}

/// Contents of one worker's object.
///
/// All-zero payloads are never materialized: [`source`](Self::source) synthesizes null bytes while
/// uploading and the [`Verifier`] checks downloads for null bytes.
pub struct Payload {
    mode: DataMode,
    len: u64,
    data: Option<Bytes>,
}

impl Payload {
    /// Generates the payload of the worker with the given ordinal.
    pub fn generate(worker: usize, mode: DataMode, len: u64) -> Result<Self, PayloadError> {
        let data = match mode {
            DataMode::AllZero => None,
            DataMode::SimpleText => {
                let mut buf = allocate(len)?;
                let text = format!("This is the test data for thread {worker} ");
                for (byte, text) in buf.iter_mut().zip(text.bytes().cycle()) {
                    *byte = text;
                }
                Some(buf)
            }
            DataMode::PseudoRandom => {
                let mut buf = allocate(len)?;
                OsRng
                    .try_fill_bytes(&mut buf)
                    .map_err(|err| PayloadError::Entropy(Box::new(err)))?;
                Some(buf)
            }
        };

        Ok(Self {
            mode,
            len,
            data: data.map(Bytes::from),
        })
    }

    /// The length of the payload in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the payload has a length of zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The materialized contents, or `None` for all-zero payloads.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Returns a fresh reader over the payload for one upload.
    pub fn source(&self) -> DataSource {
        match &self.data {
            Some(data) => Box::new(Cursor::new(data.clone())),
            None => Box::new(io::repeat(0).take(self.len)),
        }
    }

    /// Returns a verifier for one download of this payload.
    pub fn verifier(&self) -> Verifier<'_> {
        Verifier {
            expected: self.data.as_deref(),
            len: self.len,
            offset: 0,
            failure: None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("mode", &self.mode)
            .field("len", &self.len)
            .field("materialized", &self.data.is_some())
            .finish()
    }
}

/// Allocates a zero-filled buffer of exactly `len` bytes.
fn allocate(len: u64) -> Result<Vec<u8>, PayloadError> {
    let size = usize::try_from(len).map_err(|_| PayloadError::Alloc(len))?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| PayloadError::Alloc(len))?;
    buf.resize(size, 0);
    Ok(buf)
}

/// Streaming comparator for one download.
///
/// Every received chunk is checked against the expected bytes at the current offset. For all-zero
/// payloads every byte must be null. The first failure is kept, so that the caller can tell a
/// verification failure apart from a transport failure once the download has been aborted.
///
/// When verification is disabled, downloads go to [`std::io::sink`] instead, which accepts and
/// discards every chunk.
pub struct Verifier<'a> {
    expected: Option<&'a [u8]>,
    len: u64,
    offset: u64,
    failure: Option<PayloadError>,
}

impl Verifier<'_> {
    /// Checks the next chunk of the download.
    pub fn verify(&mut self, chunk: &[u8]) -> Result<(), PayloadError> {
        let remaining = self.len - self.offset;
        if chunk.len() as u64 > remaining {
            return Err(PayloadError::Overrun { expected: self.len });
        }

        let mismatch = match self.expected {
            None => chunk.iter().position(|&byte| byte != 0),
            Some(expected) => {
                let start = self.offset as usize;
                let expected = &expected[start..start + chunk.len()];
                expected.iter().zip(chunk).position(|(a, b)| a != b)
            }
        };
        if let Some(position) = mismatch {
            return Err(PayloadError::Mismatch(self.offset + position as u64));
        }

        self.offset += chunk.len() as u64;
        Ok(())
    }

    /// The number of bytes verified so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the failure that aborted the download, if any.
    pub fn into_failure(self) -> Option<PayloadError> {
        self.failure
    }

    /// Completes verification once the download has finished.
    ///
    /// Fails if a chunk was rejected or if fewer bytes than expected were received.
    pub fn finish(self) -> Result<(), PayloadError> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        if self.offset != self.len {
            return Err(PayloadError::Truncated {
                received: self.offset,
                expected: self.len,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Verifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("len", &self.len)
            .field("offset", &self.offset)
            .field("failure", &self.failure)
            .finish()
    }
}

impl io::Write for Verifier<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failure.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "verification already failed",
            ));
        }

        match self.verify(buf) {
            Ok(()) => Ok(buf.len()),
            Err(err) => {
                let io_err = io::Error::new(io::ErrorKind::InvalidData, err.to_string());
                self.failure = Some(err);
                Err(io_err)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn read_all(payload: &Payload) -> Vec<u8> {
        let mut contents = Vec::new();
        payload.source().read_to_end(&mut contents).unwrap();
        contents
    }

    #[test]
    fn parses_data_modes() {
        assert_eq!("simple-text".parse::<DataMode>().unwrap(), DataMode::SimpleText);
        assert_eq!("zeroes".parse::<DataMode>().unwrap(), DataMode::AllZero);
        assert_eq!("all-zero".parse::<DataMode>().unwrap(), DataMode::AllZero);
        assert_eq!("RANDOM".parse::<DataMode>().unwrap(), DataMode::PseudoRandom);
        assert_eq!(
            "pseudo-random".parse::<DataMode>().unwrap(),
            DataMode::PseudoRandom
        );

        let err = "ones".parse::<DataMode>().unwrap_err();
        assert!(err.to_string().contains(r#""ones""#));
    }

    #[test]
    fn simple_text_identifies_the_worker() {
        let payload = Payload::generate(7, DataMode::SimpleText, 100).unwrap();
        let contents = payload.as_bytes().unwrap();

        let text = b"This is the test data for thread 7 ";
        assert_eq!(contents.len(), 100);
        assert_eq!(&contents[..text.len()], text);
        assert_eq!(&contents[text.len()..2 * text.len()], text);
        // the tail holds a partial repetition
        assert_eq!(&contents[2 * text.len()..], &text[..100 - 2 * text.len()]);

        let other = Payload::generate(8, DataMode::SimpleText, 100).unwrap();
        assert_ne!(other.as_bytes(), payload.as_bytes());
    }

    #[test]
    fn simple_text_is_deterministic() {
        let a = Payload::generate(3, DataMode::SimpleText, 4096).unwrap();
        let b = Payload::generate(3, DataMode::SimpleText, 4096).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn all_zero_is_not_materialized() {
        let payload = Payload::generate(1, DataMode::AllZero, 10_000).unwrap();
        assert!(payload.as_bytes().is_none());
        assert_eq!(payload.len(), 10_000);

        let contents = read_all(&payload);
        assert_eq!(contents.len(), 10_000);
        assert!(contents.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn random_fills_the_whole_buffer() {
        let a = Payload::generate(1, DataMode::PseudoRandom, 4096).unwrap();
        let b = Payload::generate(1, DataMode::PseudoRandom, 4096).unwrap();

        assert_eq!(a.as_bytes().unwrap().len(), 4096);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert!(a.as_bytes().unwrap().iter().any(|&byte| byte != 0));
    }

    #[test]
    fn source_can_be_read_repeatedly() {
        let payload = Payload::generate(2, DataMode::SimpleText, 1000).unwrap();
        assert_eq!(read_all(&payload), read_all(&payload));
        assert_eq!(read_all(&payload), payload.as_bytes().unwrap());
    }

    #[test]
    fn verifies_chunked_download() {
        let payload = Payload::generate(4, DataMode::PseudoRandom, 1000).unwrap();
        let contents = payload.as_bytes().unwrap().to_vec();

        let mut verifier = payload.verifier();
        for chunk in contents.chunks(64) {
            verifier.write_all(chunk).unwrap();
        }
        assert_eq!(verifier.offset(), 1000);
        verifier.finish().unwrap();
    }

    #[test]
    fn reports_offset_of_first_mismatch() {
        let payload = Payload::generate(4, DataMode::SimpleText, 256).unwrap();
        let mut contents = payload.as_bytes().unwrap().to_vec();
        contents[200] ^= 0xff;

        let mut verifier = payload.verifier();
        verifier.verify(&contents[..128]).unwrap();
        let err = verifier.verify(&contents[128..]).unwrap_err();
        assert!(matches!(err, PayloadError::Mismatch(200)));
    }

    #[test]
    fn rejects_data_past_the_end() {
        let payload = Payload::generate(1, DataMode::SimpleText, 10).unwrap();
        let mut contents = payload.as_bytes().unwrap().to_vec();
        contents.push(b'!');

        let mut verifier = payload.verifier();
        let err = verifier.verify(&contents).unwrap_err();
        assert!(matches!(err, PayloadError::Overrun { expected: 10 }));
        assert_eq!(verifier.offset(), 0);
    }

    #[test]
    fn rejects_short_download() {
        let payload = Payload::generate(1, DataMode::SimpleText, 10).unwrap();
        let contents = payload.as_bytes().unwrap();

        let mut verifier = payload.verifier();
        verifier.verify(&contents[..6]).unwrap();
        let err = verifier.finish().unwrap_err();
        assert!(matches!(
            err,
            PayloadError::Truncated {
                received: 6,
                expected: 10
            }
        ));
    }

    #[test]
    fn zero_verifier_requires_null_bytes() {
        let payload = Payload::generate(1, DataMode::AllZero, 100).unwrap();

        let mut verifier = payload.verifier();
        verifier.verify(&[0; 50]).unwrap();
        let mut chunk = [0; 50];
        chunk[17] = 1;
        let err = verifier.verify(&chunk).unwrap_err();
        assert!(matches!(err, PayloadError::Mismatch(67)));
    }

    #[test]
    fn write_failure_is_kept_for_the_caller() {
        let payload = Payload::generate(1, DataMode::AllZero, 4).unwrap();

        let mut verifier = payload.verifier();
        let err = verifier.write(&[0, 0, 9]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // later chunks are refused as well
        assert!(verifier.write(&[0]).is_err());
        assert!(matches!(
            verifier.into_failure(),
            Some(PayloadError::Mismatch(2))
        ));
    }

    #[test]
    fn empty_payload_verifies_without_data() {
        let payload = Payload::generate(1, DataMode::SimpleText, 0).unwrap();
        assert!(payload.is_empty());
        payload.verifier().finish().unwrap();
    }
}
