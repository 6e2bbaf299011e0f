//! ICY metadata interleaving (the Shoutcast/Icecast `icy-metaint` convention).
//!
//! With metadata negotiated, the body is `metaint` payload bytes, then one
//! metadata frame, repeated. A frame is a length byte `L` followed by `L * 16`
//! bytes holding `StreamTitle='<title>';` padded with zeros. `L = 0` means the
//! title has not changed since the previous frame.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

/// Payload bytes between two metadata frames, advertised as `icy-metaint`.
pub const ICY_METAINT: usize = 8192;

const BLOCK_SIZE: usize = 16;
const MAX_BLOCKS: usize = u8::MAX as usize;
const TITLE_PREFIX: &str = "StreamTitle='";
const TITLE_SUFFIX: &str = "';";

/// Encodes a full metadata frame announcing `title`.
///
/// Titles too long for 255 blocks are cut at the last character boundary
/// that fits.
pub fn metadata_frame(title: &str) -> Bytes {
    let max_title = MAX_BLOCKS * BLOCK_SIZE - TITLE_PREFIX.len() - TITLE_SUFFIX.len();
    let mut end = title.len().min(max_title);
    while !title.is_char_boundary(end) {
        end -= 1;
    }
    let title = &title[..end];

    let text_len = TITLE_PREFIX.len() + title.len() + TITLE_SUFFIX.len();
    let blocks = text_len.div_ceil(BLOCK_SIZE);

    let mut frame = BytesMut::with_capacity(1 + blocks * BLOCK_SIZE);
    frame.put_u8(blocks as u8);
    frame.put_slice(TITLE_PREFIX.as_bytes());
    frame.put_slice(title.as_bytes());
    frame.put_slice(TITLE_SUFFIX.as_bytes());
    frame.resize(1 + blocks * BLOCK_SIZE, 0);
    frame.freeze()
}

/// Per-client framer.
///
/// Sits in the payload state until exactly `metaint` bytes have passed since
/// the last frame, emits one metadata frame, and drops back to payload. Writes
/// that straddle the boundary are split so the frame lands on the exact byte,
/// however the input happens to be chunked.
#[derive(Debug)]
pub struct IcyFramer {
    metaint: usize,
    since_metadata: usize,
    last_title: Option<Arc<str>>,
}

impl IcyFramer {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint: metaint.max(1),
            since_metadata: 0,
            last_title: None,
        }
    }

    pub fn metaint(&self) -> usize {
        self.metaint
    }

    /// Payload bytes written since the last metadata frame.
    pub fn since_metadata(&self) -> usize {
        self.since_metadata
    }

    /// Appends `payload` to `out`, inserting a frame for `title` at every boundary.
    pub fn write(&mut self, mut payload: &[u8], title: &Arc<str>, out: &mut BytesMut) {
        while !payload.is_empty() {
            let room = self.metaint - self.since_metadata;
            let n = room.min(payload.len());
            out.put_slice(&payload[..n]);
            payload = &payload[n..];
            self.since_metadata += n;

            if self.since_metadata == self.metaint {
                self.write_metadata(title, out);
                self.since_metadata = 0;
            }
        }
    }

    fn write_metadata(&mut self, title: &Arc<str>, out: &mut BytesMut) {
        if self.last_title.as_deref() == Some(&**title) {
            out.put_u8(0);
            return;
        }
        out.put_slice(&metadata_frame(title));
        self.last_title = Some(Arc::clone(title));
    }
}
