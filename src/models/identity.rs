//! Deterministic document identity
//!
//! Re-delivered events must land on the same document, so the identifier is
//! a KangarooTwelve digest over the fields that identify an event logically:
//! epoch, tick, event id, event digest (all little-endian) and the raw bytes
//! of the transaction hash. Type, size and data are not part of the input.

use std::io::Write;

use thiserror::Error;
use tiny_keccak::{Hasher, KangarooTwelve};

use super::event::{DocumentId, Event};

/// Digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Errors raised while deriving a document identifier
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("writing {field} to identity buffer: {source}")]
    Encoding {
        field: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Derive the document identifier for an event
pub fn derive_id(event: &Event) -> Result<DocumentId, IdentityError> {
    let mut buf = Vec::with_capacity(24 + event.transaction_hash.len());
    write_identity(event, &mut buf)?;
    Ok(DocumentId::from_digest(&k12_digest(&buf)))
}

/// Write the identity-bearing fields in their fixed order
pub fn write_identity<W: Write>(event: &Event, out: &mut W) -> Result<(), IdentityError> {
    out.write_all(&event.epoch.to_le_bytes())
        .map_err(encoding("epoch"))?;
    out.write_all(&event.tick.to_le_bytes())
        .map_err(encoding("tick"))?;
    out.write_all(&event.event_id.to_le_bytes())
        .map_err(encoding("event id"))?;
    out.write_all(&event.event_digest.to_le_bytes())
        .map_err(encoding("event digest"))?;
    out.write_all(event.transaction_hash.as_bytes())
        .map_err(encoding("transaction hash"))?;
    Ok(())
}

fn encoding(field: &'static str) -> impl FnOnce(std::io::Error) -> IdentityError {
    move |source| IdentityError::Encoding { field, source }
}

/// KangarooTwelve with an empty customization string, 32-byte output
pub fn k12_digest(input: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = KangarooTwelve::new(b"");
    hasher.update(input);
    let mut out = [0u8; DIGEST_LEN];
    hasher.finalize(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Event {
        Event {
            epoch: 150,
            tick: 18_000_123,
            event_id: 42,
            event_digest: 0x0102_0304_0506_0708,
            transaction_hash: "zbgvhbmndgwjdzjgqwbmeeeoyoqtbybexpbtwmlgpgdcswnpfvnqpeeadrvc"
                .to_string(),
            event_type: 0,
            event_size: 72,
            event_data: "AAAA".to_string(),
        }
    }

    #[test]
    fn test_k12_empty_input_vector() {
        assert_eq!(
            hex::encode(k12_digest(b"")),
            "1ac2d450fc3b4205d19da7bfca1b37513c0803577ac7167f06fe2ce1f0ef39e5"
        );
    }

    #[test]
    fn test_identity_layout() {
        let mut e = event();
        e.transaction_hash = "ab".to_string();
        let mut buf = Vec::new();
        write_identity(&e, &mut buf).unwrap();

        assert_eq!(buf.len(), 4 + 4 + 8 + 8 + 2);
        assert_eq!(&buf[0..4], &150u32.to_le_bytes());
        assert_eq!(&buf[4..8], &18_000_123u32.to_le_bytes());
        assert_eq!(&buf[8..16], &42u64.to_le_bytes());
        assert_eq!(&buf[16..24], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&buf[24..], b"ab");
    }

    #[test]
    fn test_id_is_hex_digest_of_layout() {
        let e = event();
        let mut buf = Vec::new();
        write_identity(&e, &mut buf).unwrap();

        let id = derive_id(&e).unwrap();
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(id.as_str(), hex::encode(k12_digest(&buf)));
    }

    #[test]
    fn test_id_is_deterministic() {
        assert_eq!(derive_id(&event()).unwrap(), derive_id(&event()).unwrap());
    }

    #[test]
    fn test_id_ignores_type_size_and_data() {
        let base = derive_id(&event()).unwrap();

        let mut other = event();
        other.event_type = 7;
        other.event_size = 1;
        other.event_data = "something else entirely".to_string();

        assert_eq!(derive_id(&other).unwrap(), base);
    }

    #[test]
    fn test_id_changes_with_each_identity_field() {
        let base = derive_id(&event()).unwrap();

        let mutations: Vec<(&str, fn(&mut Event))> = vec![
            ("epoch", |e| e.epoch += 1),
            ("tick", |e| e.tick += 1),
            ("event_id", |e| e.event_id += 1),
            ("event_digest", |e| e.event_digest += 1),
            ("transaction_hash", |e| e.transaction_hash.push('a')),
        ];

        for (field, mutate) in mutations {
            let mut e = event();
            mutate(&mut e);
            assert_ne!(derive_id(&e).unwrap(), base, "{} did not affect the id", field);
        }
    }

    #[test]
    fn test_adjacent_ticks_do_not_collide() {
        let mut one = event();
        one.tick = 1;
        let mut two = event();
        two.tick = 2;
        assert_ne!(derive_id(&one).unwrap(), derive_id(&two).unwrap());
    }

    #[test]
    fn test_write_failure_is_reported() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let err = write_identity(&event(), &mut Full).unwrap_err();
        let IdentityError::Encoding { field, .. } = err;
        assert_eq!(field, "epoch");
    }
}
