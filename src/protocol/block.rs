use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the block index prefix in every data datagram.
pub const FRAME_HEADER_LEN: usize = 8;

/// One UDP data datagram: an 8-byte big-endian block index followed by up to `block_size`
///  payload bytes. The datagram boundary delimits the frame, so there is no length field,
///  checksum or trailer: the payload is simply everything after the index.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockFrame {
    pub block_index: u64,
    pub payload: Bytes,
}

impl BlockFrame {
    pub fn new(block_index: u64, payload: impl Into<Bytes>) -> BlockFrame {
        BlockFrame { block_index, payload: payload.into() }
    }

    /// Total size of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u64(self.block_index);
        buf.put_slice(&self.payload);
    }

    /// Convenience for the send path: one allocation, ready to pass to the socket.
    pub fn to_datagram(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.write(&mut buf);
        buf.freeze()
    }

    pub fn try_read(buf: &mut impl Buf) -> anyhow::Result<BlockFrame> {
        let block_index = buf.try_get_u64()?;
        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(BlockFrame { block_index, payload })
    }
}
