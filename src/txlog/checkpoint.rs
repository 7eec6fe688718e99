use crate::extent::{Attr, Extent, ExtentStore, FileType, InodeId};
use crate::txlog::{TxId, TxLogError};
use bytes::{Buf, BufMut, BytesMut};
use std::convert::TryFrom;

/// Fixed part of each extent record: inode, type, three times, content length.
const EXTENT_HEADER: usize = 8 + 4 + 8 * 3 + 4;

/// Full image of an extent store, plus the next transaction id to hand out:
///
/// | next_txid: u64 | count: u32 | extent * count |
///
/// and every extent is:
///
/// | inode: u64 | type: u32 | atime: i64 | mtime: i64 | ctime: i64 | len: u32 | data |
pub(crate) fn encode(store: &ExtentStore, next_txid: TxId) -> BytesMut {
    let mut buf = BytesMut::new();
    let extents: Vec<(&InodeId, &Extent)> = store.iter().collect();
    buf.put_u64(next_txid);
    buf.put_u32(extents.len() as u32);

    for (inode, extent) in extents {
        buf.put_u64(*inode);
        buf.put_u32(extent.attr.file_type.as_u32());
        buf.put_i64(extent.attr.atime);
        buf.put_i64(extent.attr.mtime);
        buf.put_i64(extent.attr.ctime);
        buf.put_u32(extent.data.len() as u32);
        buf.put_slice(&extent.data);
    }

    buf
}

pub(crate) fn decode(mut buf: &[u8]) -> Result<(ExtentStore, TxId), TxLogError> {
    let corrupt = |reason: &str| TxLogError::CorruptCheckpoint(reason.to_string());
    if buf.remaining() < 8 + 4 {
        return Err(corrupt("missing header"));
    }
    let next_txid = buf.get_u64();
    let count = buf.get_u32();

    let mut store = ExtentStore::empty();
    for _ in 0..count {
        if buf.remaining() < EXTENT_HEADER {
            return Err(corrupt("truncated extent header"));
        }
        let inode = buf.get_u64();
        let file_type =
            FileType::try_from(buf.get_u32()).map_err(|t| corrupt(&format!("unknown file type {}", t)))?;
        let atime = buf.get_i64();
        let mtime = buf.get_i64();
        let ctime = buf.get_i64();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(corrupt("truncated extent data"));
        }
        let data = buf.copy_to_bytes(len);

        store.insert_extent(
            inode,
            Extent {
                attr: Attr {
                    file_type,
                    size: len as u64,
                    atime,
                    mtime,
                    ctime,
                },
                data,
            },
        );
    }

    if buf.has_remaining() {
        return Err(corrupt("trailing bytes"));
    }

    Ok((store, next_txid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn store_image_survives_encoding() {
        let mut store = ExtentStore::new();
        let file = store.create(FileType::File).unwrap();
        store.put(file, Bytes::from_static(b"contents")).unwrap();
        store.create(FileType::Symlink).unwrap();

        let (decoded, next_txid) = decode(&encode(&store, 42)).unwrap();
        assert_eq!(next_txid, 42);
        assert_eq!(decoded.contents(), store.contents());
        assert_eq!(decoded.getattr(file).unwrap(), store.getattr(file).unwrap());
    }

    #[test]
    fn truncated_image_is_rejected() {
        let mut store = ExtentStore::new();
        let file = store.create(FileType::File).unwrap();
        store.put(file, Bytes::from_static(b"contents")).unwrap();
        let buf = encode(&store, 1);

        assert!(matches!(
            decode(&buf[..buf.len() - 1]),
            Err(TxLogError::CorruptCheckpoint(_))
        ));
        assert!(matches!(decode(&buf[..4]), Err(TxLogError::CorruptCheckpoint(_))));
    }
}
