//! Protocol codec for encoding/decoding messages
//!
//! Pure functions over byte slices. Every decoder consumes its input exactly:
//! a buffer that is shorter or longer than the declared dimensions is an error,
//! never a partially accepted value.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{
    Command, Frame, MessageHeader, PathQueryPayload, PathResultPayload, Status,
    UploadGraphPayload, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Header must be {size} bytes, got {0}", size = HEADER_SIZE)]
    HeaderLength(usize),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("{count} unexpected trailing bytes after {what}")]
    TrailingBytes { what: &'static str, count: usize },

    #[error("Incidence block is {actual} bytes, expected {expected}")]
    IncidenceLength { expected: usize, actual: usize },

    #[error("Incidence block has non-zero padding bits")]
    IncidencePadding,

    #[error("Weight count {weights} does not match edge count {edges}")]
    WeightCountMismatch { weights: u32, edges: u16 },

    #[error("Header announces {declared} payload bytes but {actual} arrived")]
    PayloadSizeMismatch { declared: usize, actual: usize },

    #[error("Path of {0} vertices cannot be encoded")]
    PathTooLong(usize),

    #[error("Text payload is not valid UTF-8")]
    InvalidText,
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode a header into its fixed 12-byte form
pub fn encode_header(header: &MessageHeader) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    let mut buf = &mut out[..];
    buf.put_u8(header.command.code());
    buf.put_u8(header.status.code());
    buf.put_u16(header.request_id);
    buf.put_u32(header.payload_size);
    buf.put_u32(0);
    out
}

/// Decode a header; the input must be exactly 12 bytes
///
/// Only the length and the payload ceiling are checked here. Unrecognised
/// command and status codes decode as `Unknown` and are left to the dispatcher.
pub fn decode_header(bytes: &[u8]) -> CodecResult<MessageHeader> {
    if bytes.len() != HEADER_SIZE {
        return Err(CodecError::HeaderLength(bytes.len()));
    }

    let mut buf = bytes;
    let command = Command::from(buf.get_u8());
    let status = Status::from(buf.get_u8());
    let request_id = buf.get_u16();
    let payload_size = buf.get_u32();
    let _reserved = buf.get_u32();

    if payload_size as usize > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge {
            size: payload_size as usize,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok(MessageHeader {
        command,
        status,
        request_id,
        payload_size,
    })
}

/// Encode a whole frame (header then payload) into one contiguous buffer
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + frame.payload.len());
    buf.put_slice(&encode_header(&frame.header));
    buf.put_slice(&frame.payload);
    buf.freeze()
}

/// Decode a frame carried in a single datagram
///
/// The declared payload size must match the bytes that follow the header.
pub fn decode_frame(datagram: &[u8]) -> CodecResult<Frame> {
    if datagram.len() < HEADER_SIZE {
        return Err(CodecError::HeaderLength(datagram.len()));
    }
    let header = decode_header(&datagram[..HEADER_SIZE])?;
    let payload = &datagram[HEADER_SIZE..];
    if payload.len() != header.payload_size as usize {
        return Err(CodecError::PayloadSizeMismatch {
            declared: header.payload_size as usize,
            actual: payload.len(),
        });
    }
    Ok(Frame {
        header,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// Number of bytes needed to pack a `vertices x edges` bit matrix
pub fn incidence_byte_len(vertex_count: u16, edge_count: u16) -> usize {
    (vertex_count as usize * edge_count as usize + 7) / 8
}

/// Pack an incidence matrix into bits, vertex-major, least significant bit first
///
/// Bit `vertex * edge_count + edge` is set iff the cell is non-zero. The edge count is
/// taken from the first row; unused high bits of the last byte stay zero.
pub fn pack_incidence(matrix: &[Vec<u8>]) -> Vec<u8> {
    let edge_count = matrix.first().map_or(0, Vec::len);
    let total_bits = matrix.len() * edge_count;
    let mut bits = vec![0u8; (total_bits + 7) / 8];

    for (v, row) in matrix.iter().enumerate() {
        for (e, &cell) in row.iter().take(edge_count).enumerate() {
            if cell != 0 {
                let index = v * edge_count + e;
                bits[index / 8] |= 1 << (index % 8);
            }
        }
    }
    bits
}

/// Unpack bits into a `vertex_count x edge_count` matrix of 0/1 cells
pub fn unpack_incidence(vertex_count: u16, edge_count: u16, bits: &[u8]) -> CodecResult<Vec<Vec<u8>>> {
    let expected = incidence_byte_len(vertex_count, edge_count);
    if bits.len() != expected {
        return Err(CodecError::IncidenceLength {
            expected,
            actual: bits.len(),
        });
    }

    let total_bits = vertex_count as usize * edge_count as usize;
    if total_bits % 8 != 0 {
        let used = (total_bits % 8) as u32;
        if let Some(&last) = bits.last() {
            if last >> used != 0 {
                return Err(CodecError::IncidencePadding);
            }
        }
    }

    let edges = edge_count as usize;
    let matrix = (0..vertex_count as usize)
        .map(|v| {
            (0..edges)
                .map(|e| {
                    let index = v * edges + e;
                    (bits[index / 8] >> (index % 8)) & 1
                })
                .collect()
        })
        .collect();
    Ok(matrix)
}

fn read_u16(buf: &mut &[u8], what: &'static str) -> CodecResult<u16> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u16())
}

fn read_u32(buf: &mut &[u8], what: &'static str) -> CodecResult<u32> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u32())
}

fn expect_consumed(buf: &[u8], what: &'static str) -> CodecResult<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes {
            what,
            count: buf.len(),
        })
    }
}

pub fn encode_upload_graph(payload: &UploadGraphPayload) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        12 + payload.incidence_bits.len() + payload.weights.len() * 4,
    );
    buf.put_u16(payload.vertex_count);
    buf.put_u16(payload.edge_count);
    buf.put_u32(payload.incidence_bits.len() as u32);
    buf.put_slice(&payload.incidence_bits);
    buf.put_u32(payload.weights.len() as u32);
    for &weight in &payload.weights {
        buf.put_u32(weight);
    }
    buf.freeze()
}

pub fn decode_upload_graph(bytes: &[u8]) -> CodecResult<UploadGraphPayload> {
    let mut buf = bytes;
    let vertex_count = read_u16(&mut buf, "graph vertex count")?;
    let edge_count = read_u16(&mut buf, "graph edge count")?;
    let bits_len = read_u32(&mut buf, "incidence block length")? as usize;

    let expected = incidence_byte_len(vertex_count, edge_count);
    if bits_len != expected {
        return Err(CodecError::IncidenceLength {
            expected,
            actual: bits_len,
        });
    }
    if buf.remaining() < bits_len {
        return Err(CodecError::Truncated("incidence block"));
    }
    let incidence_bits = buf[..bits_len].to_vec();
    buf.advance(bits_len);

    let weight_count = read_u32(&mut buf, "weight count")?;
    if weight_count != edge_count as u32 {
        return Err(CodecError::WeightCountMismatch {
            weights: weight_count,
            edges: edge_count,
        });
    }
    if buf.remaining() < weight_count as usize * 4 {
        return Err(CodecError::Truncated("weight list"));
    }
    let weights = (0..weight_count).map(|_| buf.get_u32()).collect();

    expect_consumed(buf, "graph payload")?;

    Ok(UploadGraphPayload {
        vertex_count,
        edge_count,
        incidence_bits,
        weights,
    })
}

pub fn encode_path_query(query: &PathQueryPayload) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(query.source);
    buf.put_u16(query.target);
    buf.freeze()
}

pub fn decode_path_query(bytes: &[u8]) -> CodecResult<PathQueryPayload> {
    let mut buf = bytes;
    let source = read_u16(&mut buf, "query source")?;
    let target = read_u16(&mut buf, "query target")?;
    expect_consumed(buf, "path query")?;
    Ok(PathQueryPayload { source, target })
}

pub fn encode_path_result(result: &PathResultPayload) -> CodecResult<Bytes> {
    let len = u16::try_from(result.path.len())
        .map_err(|_| CodecError::PathTooLong(result.path.len()))?;
    let mut buf = BytesMut::with_capacity(6 + result.path.len() * 2);
    buf.put_u32(result.distance);
    buf.put_u16(len);
    for &vertex in &result.path {
        buf.put_u16(vertex);
    }
    Ok(buf.freeze())
}

pub fn decode_path_result(bytes: &[u8]) -> CodecResult<PathResultPayload> {
    let mut buf = bytes;
    let distance = read_u32(&mut buf, "path distance")?;
    let len = read_u16(&mut buf, "path length")? as usize;
    if buf.remaining() < len * 2 {
        return Err(CodecError::Truncated("path vertices"));
    }
    let path = (0..len).map(|_| buf.get_u16()).collect();
    expect_consumed(buf, "path result")?;
    Ok(PathResultPayload { distance, path })
}

/// Encode a length-prefixed string
///
/// Lossy for long input: the length prefix is 16 bits, so text beyond 65535
/// bytes is cut at the last character boundary that fits. Only server-authored
/// messages pass through here, and they stay far below that limit.
pub fn encode_text(text: &str) -> Bytes {
    let mut end = text.len().min(u16::MAX as usize);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let text = &text.as_bytes()[..end];

    let mut buf = BytesMut::with_capacity(2 + text.len());
    buf.put_u16(text.len() as u16);
    buf.put_slice(text);
    buf.freeze()
}

/// Decode a length-prefixed string; the bytes must be valid UTF-8
pub fn decode_text(bytes: &[u8]) -> CodecResult<String> {
    let mut buf = bytes;
    let len = read_u16(&mut buf, "text length")? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated("text"));
    }
    let text = std::str::from_utf8(&buf[..len])
        .map_err(|_| CodecError::InvalidText)?
        .to_string();
    buf.advance(len);
    expect_consumed(buf, "text")?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph_payload() -> UploadGraphPayload {
        let matrix: Vec<Vec<u8>> = vec![
            vec![1, 0, 0, 0, 0, 1],
            vec![1, 1, 0, 0, 0, 0],
            vec![0, 1, 1, 0, 0, 0],
            vec![0, 0, 1, 1, 0, 0],
            vec![0, 0, 0, 1, 1, 0],
            vec![0, 0, 0, 0, 1, 1],
        ];
        UploadGraphPayload {
            vertex_count: 6,
            edge_count: 6,
            incidence_bits: pack_incidence(&matrix),
            weights: vec![1; 6],
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let headers = [
            MessageHeader::request(Command::UploadGraph, 7),
            MessageHeader {
                command: Command::Unknown(200),
                status: Status::NotReady,
                request_id: u16::MAX,
                payload_size: MAX_PAYLOAD_SIZE as u32,
            },
            MessageHeader::ack(0),
        ];
        for header in headers {
            assert_eq!(decode_header(&encode_header(&header)).unwrap(), header);
        }
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let mut header = MessageHeader::new(Command::PathResult, Status::InternalError, 0x0102);
        header.payload_size = 0x0A0B0C0D;
        assert_eq!(
            encode_header(&header),
            [4, 2, 0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_header_rejects_wrong_length_and_oversize() {
        assert_eq!(decode_header(&[0u8; 11]), Err(CodecError::HeaderLength(11)));
        assert_eq!(decode_header(&[0u8; 13]), Err(CodecError::HeaderLength(13)));

        let mut bytes = encode_header(&MessageHeader::request(Command::Help, 1));
        bytes[4..8].copy_from_slice(&((MAX_PAYLOAD_SIZE as u32) + 1).to_be_bytes());
        assert!(matches!(
            decode_header(&bytes),
            Err(CodecError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_header_keeps_unknown_status() {
        let mut bytes = encode_header(&MessageHeader::request(Command::Help, 0x1234));
        bytes[1] = 9;
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.status, Status::Unknown(9));
        assert_eq!(header.command, Command::Help);
        assert_eq!(header.request_id, 0x1234);
        assert_eq!(encode_header(&header), bytes);
    }

    #[test]
    fn test_header_ignores_reserved_word() {
        let mut bytes = encode_header(&MessageHeader::request(Command::Exit, 3));
        bytes[8..12].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(
            decode_header(&bytes).unwrap(),
            MessageHeader::request(Command::Exit, 3)
        );
    }

    #[test]
    fn test_incidence_pack_unpack_shapes() {
        for vertices in 0u16..=9 {
            for edges in 0u16..=9 {
                let matrix: Vec<Vec<u8>> = (0..vertices)
                    .map(|v| (0..edges).map(|e| ((v * 7 + e * 3) % 3 == 0) as u8).collect())
                    .collect();
                let bits = pack_incidence(&matrix);
                assert_eq!(bits.len(), incidence_byte_len(vertices, edges));
                assert_eq!(unpack_incidence(vertices, edges, &bits).unwrap(), matrix);
            }
        }
    }

    #[test]
    fn test_incidence_bit_positions() {
        // 2 x 3: bits 0 (v0,e0) and 4 (v1,e1)
        let bits = pack_incidence(&[vec![1, 0, 0], vec![0, 5, 0]]);
        assert_eq!(bits, vec![0b0001_0001]);
    }

    #[test]
    fn test_unpack_rejects_bad_length_and_padding() {
        assert_eq!(
            unpack_incidence(6, 6, &[0u8; 4]),
            Err(CodecError::IncidenceLength { expected: 5, actual: 4 })
        );
        // 6 x 6 = 36 bits, so the top four bits of byte 4 are padding
        let mut bits = vec![0u8; 5];
        bits[4] = 0x10;
        assert_eq!(unpack_incidence(6, 6, &bits), Err(CodecError::IncidencePadding));
    }

    #[test]
    fn test_upload_graph_roundtrip() {
        let payload = sample_graph_payload();
        let encoded = encode_upload_graph(&payload);
        assert_eq!(decode_upload_graph(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_upload_graph_rejects_malformed() {
        let encoded = encode_upload_graph(&sample_graph_payload());

        for cut in [0, 3, 7, 10, encoded.len() - 1] {
            assert!(decode_upload_graph(&encoded[..cut]).is_err(), "cut at {}", cut);
        }

        let mut trailing = encoded.to_vec();
        trailing.push(0);
        assert!(matches!(
            decode_upload_graph(&trailing),
            Err(CodecError::TrailingBytes { count: 1, .. })
        ));

        let mut fewer_weights = sample_graph_payload();
        fewer_weights.weights.pop();
        assert_eq!(
            decode_upload_graph(&encode_upload_graph(&fewer_weights)),
            Err(CodecError::WeightCountMismatch { weights: 5, edges: 6 })
        );

        let mut short_bits = sample_graph_payload();
        short_bits.incidence_bits.pop();
        assert!(matches!(
            decode_upload_graph(&encode_upload_graph(&short_bits)),
            Err(CodecError::IncidenceLength { .. })
        ));
    }

    #[test]
    fn test_path_query_exact_length() {
        let query = PathQueryPayload { source: 0, target: 3 };
        let encoded = encode_path_query(&query);
        assert_eq!(&encoded[..], &[0, 0, 0, 3]);
        assert_eq!(decode_path_query(&encoded).unwrap(), query);
        assert!(decode_path_query(&encoded[..3]).is_err());
        assert!(decode_path_query(&[0, 0, 0, 3, 0]).is_err());
    }

    #[test]
    fn test_path_result_roundtrip_and_bounds() {
        let result = PathResultPayload {
            distance: 3,
            path: vec![0, 1, 2, 3],
        };
        let encoded = encode_path_result(&result).unwrap();
        assert_eq!(decode_path_result(&encoded).unwrap(), result);
        assert!(decode_path_result(&encoded[..encoded.len() - 1]).is_err());

        let mut longer = encoded.to_vec();
        longer.extend_from_slice(&[0, 9]);
        assert!(decode_path_result(&longer).is_err());
    }

    #[test]
    fn test_text_roundtrip_and_bounds() {
        let encoded = encode_text("Graph accepted");
        assert_eq!(decode_text(&encoded).unwrap(), "Graph accepted");
        assert_eq!(decode_text(&encode_text("")).unwrap(), "");
        assert!(decode_text(&encoded[..5]).is_err());
        assert!(decode_text(&[0]).is_err());

        let mut longer = encoded.to_vec();
        longer.push(b'!');
        assert!(decode_text(&longer).is_err());
    }

    #[test]
    fn test_text_rejects_invalid_utf8() {
        assert_eq!(decode_text(&[0, 2, 0xC3, 0x28]), Err(CodecError::InvalidText));
        assert_eq!(decode_text(&[0, 2, 0xC3, 0xA9]).unwrap(), "\u{e9}");
    }

    #[test]
    fn test_text_truncates_at_char_boundary() {
        // 65534 ASCII bytes plus a two-byte character would overflow the prefix by one
        let mut text = "a".repeat(u16::MAX as usize - 1);
        text.push('\u{e9}');
        let encoded = encode_text(&text);
        assert_eq!(&encoded[..2], &(u16::MAX - 1).to_be_bytes());
        assert_eq!(decode_text(&encoded).unwrap(), "a".repeat(u16::MAX as usize - 1));
    }

    #[test]
    fn test_frame_datagram_roundtrip() {
        let frame = Frame::new(
            MessageHeader::request(Command::PathQuery, 12),
            encode_path_query(&PathQueryPayload { source: 1, target: 2 }),
        );
        let datagram = encode_frame(&frame);
        assert_eq!(datagram.len(), HEADER_SIZE + 4);
        assert_eq!(decode_frame(&datagram).unwrap(), frame);
        assert!(matches!(
            decode_frame(&datagram[..HEADER_SIZE + 2]),
            Err(CodecError::PayloadSizeMismatch { declared: 4, actual: 2 })
        ));
        assert!(decode_frame(&datagram[..5]).is_err());
    }
}
