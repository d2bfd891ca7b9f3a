//! SHA-256 helpers and the pairing-code derivation.

use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::wire::CHUNK_SIZE;

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 of a file, streamed in 64 KiB reads.
pub async fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Short pairing code for out-of-band first-contact verification.
///
/// First 8 hex characters of `SHA-256(device_id ":" ip ":" port)`,
/// uppercased and split as `XXXX-XXXX`. The code changes with the IP:
/// a stale code is the freshness signal, not a bug.
pub fn pairing_code(device_id: &str, ip: &str, port: u16) -> String {
    let digest = sha256_hex(format!("{device_id}:{ip}:{port}").as_bytes());
    let code = digest[..8].to_uppercase();
    format!("{}-{}", &code[..4], &code[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vectors() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn file_checksum_matches_slice_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        // Larger than one chunk so the streaming path is exercised.
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        assert_eq!(checksum_file(&path).await.unwrap(), sha256_hex(&data));
    }

    #[test]
    fn pairing_code_shape_and_determinism() {
        let code = pairing_code("device-1", "192.168.1.5", 52637);
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        assert!(code
            .chars()
            .all(|c| c == '-' || c.is_ascii_uppercase() || c.is_ascii_digit()));

        assert_eq!(code, pairing_code("device-1", "192.168.1.5", 52637));
        // Any ingredient change yields a different code.
        assert_ne!(code, pairing_code("device-1", "192.168.1.6", 52637));
        assert_ne!(code, pairing_code("device-1", "192.168.1.5", 52638));
        assert_ne!(code, pairing_code("device-2", "192.168.1.5", 52637));
    }
}
