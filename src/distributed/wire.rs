//! Encoding of task arguments and results exchanged with cluster engines
//!
//! Payloads are compact JSON, optionally zlib compressed at the highest level when the run
//! configuration sets `compress_msg`.
//!

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use simple_error::{SimpleResult, try_with};

pub fn encode<T: Serialize>(value: &T, compress: bool) -> SimpleResult<Vec<u8>> {
    let json = try_with!(serde_json::to_vec(value), "Unable to serialize task message");
    if !compress {
        return Ok(json);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    try_with!(encoder.write_all(&json), "Unable to compress task message");
    let compressed = try_with!(encoder.finish(), "Unable to compress task message");
    Ok(compressed)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], compressed: bool) -> SimpleResult<T> {
    let value = if compressed {
        let mut json = Vec::new();
        try_with!(
            ZlibDecoder::new(bytes).read_to_end(&mut json),
            "Unable to decompress task message"
        );
        try_with!(serde_json::from_slice(&json), "Unable to parse task message")
    } else {
        try_with!(serde_json::from_slice(bytes), "Unable to parse task message")
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::distributed::TaskValue;
    use crate::work_item::WorkItem;

    #[test]
    fn test_compressed_message() {
        let item = WorkItem::new("sample1", RunConfig::default());
        let args = vec![TaskValue::Item(item); 50];
        let plain = encode(&args, false).unwrap();
        let compressed = encode(&args, true).unwrap();
        assert!(compressed.len() < plain.len());

        // Plain payloads are compact JSON
        assert!(!plain.contains(&b'\n'));
        assert!(!plain.windows(2).any(|x| x == b", "));

        let decoded: Vec<TaskValue> = decode(&compressed, true).unwrap();
        assert_eq!(decoded, args);
        assert!(decode::<Vec<TaskValue>>(&plain, true).is_err());
    }
}
