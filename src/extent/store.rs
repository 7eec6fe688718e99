use bytes::Bytes;
use std::collections::BTreeMap;
use std::convert::TryFrom;

pub type InodeId = u64;

/// Inode allocated at construction for the root directory.
pub const ROOT_INODE: InodeId = 1;
/// Size of the inode table. Valid ids are `1..=MAX_INODES`.
pub const MAX_INODES: InodeId = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileType {
    Dir,
    File,
    Symlink,
}

impl FileType {
    pub fn as_u32(&self) -> u32 {
        match self {
            FileType::Dir => 1,
            FileType::File => 2,
            FileType::Symlink => 3,
        }
    }
}

impl TryFrom<u32> for FileType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FileType::Dir),
            2 => Ok(FileType::File),
            3 => Ok(FileType::Symlink),
            other => Err(other),
        }
    }
}

/// Times are Unix seconds, read from the clock of the node applying the change. Replicas agree on
/// type, size, and contents, but each stamps its own times.
#[derive(Clone, Debug, PartialEq)]
pub struct Attr {
    pub file_type: FileType,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ExtentError {
    #[error("No extent with inode {0}")]
    NoEntry(InodeId),
    #[error("Inode {0} is already allocated")]
    AlreadyExists(InodeId),
    #[error("Inode {0} is outside the inode table")]
    OutOfRange(InodeId),
    #[error("Inode table is full")]
    NoFreeInode,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Extent {
    pub(crate) attr: Attr,
    pub(crate) data: Bytes,
}

/// ExtentStore is the inode table: a bounded map from inode id to its attributes and contents.
#[derive(Clone, Debug)]
pub struct ExtentStore {
    extents: BTreeMap<InodeId, Extent>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl ExtentStore {
    pub fn new() -> Self {
        let mut store = ExtentStore::empty();
        store.extents.insert(ROOT_INODE, Extent::new(FileType::Dir));
        store
    }

    pub(crate) fn empty() -> Self {
        ExtentStore {
            extents: BTreeMap::new(),
        }
    }

    /// Allocate the lowest free inode.
    pub fn create(&mut self, file_type: FileType) -> Result<InodeId, ExtentError> {
        let inode = self.next_free_inode()?;
        self.create_at(inode, file_type)?;
        Ok(inode)
    }

    pub(crate) fn next_free_inode(&self) -> Result<InodeId, ExtentError> {
        (1..=MAX_INODES)
            .find(|id| !self.extents.contains_key(id))
            .ok_or(ExtentError::NoFreeInode)
    }

    /// Allocate a specific inode. Used when replaying a logged create.
    pub(crate) fn create_at(&mut self, inode: InodeId, file_type: FileType) -> Result<(), ExtentError> {
        if inode == 0 || inode > MAX_INODES {
            return Err(ExtentError::OutOfRange(inode));
        }
        if self.extents.contains_key(&inode) {
            return Err(ExtentError::AlreadyExists(inode));
        }
        self.extents.insert(inode, Extent::new(file_type));
        Ok(())
    }

    pub fn put(&mut self, inode: InodeId, data: Bytes) -> Result<(), ExtentError> {
        let extent = self.extents.get_mut(&inode).ok_or(ExtentError::NoEntry(inode))?;
        let t = now();
        extent.attr.size = data.len() as u64;
        extent.attr.mtime = t;
        extent.attr.ctime = t;
        extent.data = data;
        Ok(())
    }

    pub fn get(&self, inode: InodeId) -> Result<Bytes, ExtentError> {
        self.extents
            .get(&inode)
            .map(|extent| extent.data.clone())
            .ok_or(ExtentError::NoEntry(inode))
    }

    pub fn getattr(&self, inode: InodeId) -> Result<Attr, ExtentError> {
        self.extents
            .get(&inode)
            .map(|extent| extent.attr.clone())
            .ok_or(ExtentError::NoEntry(inode))
    }

    pub fn remove(&mut self, inode: InodeId) -> Result<(), ExtentError> {
        self.extents
            .remove(&inode)
            .map(|_| ())
            .ok_or(ExtentError::NoEntry(inode))
    }

    pub fn contains(&self, inode: InodeId) -> bool {
        self.extents.contains_key(&inode)
    }

    /// Type and contents of every allocated inode. Times are left out so two stores that saw the
    /// same operations at different moments compare equal.
    pub fn contents(&self) -> BTreeMap<InodeId, (FileType, Bytes)> {
        self.extents
            .iter()
            .map(|(id, extent)| (*id, (extent.attr.file_type, extent.data.clone())))
            .collect()
    }

    pub(crate) fn insert_extent(&mut self, inode: InodeId, extent: Extent) {
        self.extents.insert(inode, extent);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&InodeId, &Extent)> {
        self.extents.iter()
    }
}

impl Default for ExtentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Extent {
    fn new(file_type: FileType) -> Self {
        let t = now();
        Extent {
            attr: Attr {
                file_type,
                size: 0,
                atime: t,
                mtime: t,
                ctime: t,
            },
            data: Bytes::new(),
        }
    }
}
