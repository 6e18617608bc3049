//! Packed little-endian record layouts.
//!
//! These records travel on the wire (file-share metadata, restored share
//! files) or live in the KV store and recipe files (share index values,
//! file recipes). Every layout is packed with no padding; multi-byte
//! integers are little-endian. Parsers validate declared counts against the
//! buffer length before touching any entry.

use crate::error::ProtoError;
use crate::types::{ContainerName, Fingerprint, UserId, CONTAINER_NAME_SIZE, FP_SIZE};

/// Serialized size of [`FileShareMetaHead`].
pub const FILE_SHARE_META_HEAD_SIZE: usize = 36;
/// Serialized size of [`ShareMetaEntry`].
pub const SHARE_META_ENTRY_SIZE: usize = FP_SIZE + 12;
/// Serialized size of [`ShareIndexHead`].
pub const SHARE_INDEX_HEAD_SIZE: usize = 4 + 4 + 1 + 8 + FP_SIZE + CONTAINER_NAME_SIZE + 8;
/// Serialized size of one user reference entry in a share index value.
pub const SHARE_USER_REF_SIZE: usize = 4;
/// Serialized size of [`FileRecipeHead`].
pub const FILE_RECIPE_HEAD_SIZE: usize = 16;
/// Serialized size of [`FileRecipeEntry`].
pub const FILE_RECIPE_ENTRY_SIZE: usize = FP_SIZE + 12;
/// Serialized size of [`ShareFileHead`].
pub const SHARE_FILE_HEAD_SIZE: usize = 12;
/// Serialized size of [`ShareEntry`].
pub const SHARE_ENTRY_SIZE: usize = 12;

fn need(what: &'static str, buf: &[u8], need: usize) -> Result<(), ProtoError> {
    if buf.len() < need {
        return Err(ProtoError::Truncated {
            what,
            need,
            have: buf.len(),
        });
    }
    Ok(())
}

fn get_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn get_i64(buf: &[u8], off: usize) -> i64 {
    i64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

fn get_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Head of the file-share metadata a client uploads with each fragment.
///
/// A file larger than the client's buffers arrives as several fragments
/// over one session; `num_of_past_secrets` counts the shares already
/// processed by earlier fragments of the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileShareMetaHead {
    /// Length of the full file name that follows the head.
    pub full_name_size: i32,
    /// Logical size of the original file.
    pub file_size: i64,
    /// Shares of this file already processed in earlier fragments.
    pub num_of_past_secrets: i32,
    /// Bytes of those past shares.
    pub size_of_past_secrets: i64,
    /// Shares carried by this fragment.
    pub num_of_coming_secrets: i32,
    /// Bytes of the coming shares.
    pub size_of_coming_secrets: i64,
}

impl FileShareMetaHead {
    /// Parse a head from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        need("file share meta head", buf, FILE_SHARE_META_HEAD_SIZE)?;
        Ok(FileShareMetaHead {
            full_name_size: get_i32(buf, 0),
            file_size: get_i64(buf, 4),
            num_of_past_secrets: get_i32(buf, 12),
            size_of_past_secrets: get_i64(buf, 16),
            num_of_coming_secrets: get_i32(buf, 24),
            size_of_coming_secrets: get_i64(buf, 28),
        })
    }

    /// Serialize the head.
    pub fn to_bytes(&self) -> [u8; FILE_SHARE_META_HEAD_SIZE] {
        let mut buf = [0u8; FILE_SHARE_META_HEAD_SIZE];
        buf[0..4].copy_from_slice(&self.full_name_size.to_le_bytes());
        buf[4..12].copy_from_slice(&self.file_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_of_past_secrets.to_le_bytes());
        buf[16..24].copy_from_slice(&self.size_of_past_secrets.to_le_bytes());
        buf[24..28].copy_from_slice(&self.num_of_coming_secrets.to_le_bytes());
        buf[28..36].copy_from_slice(&self.size_of_coming_secrets.to_le_bytes());
        buf
    }
}

/// One share described by the file-share metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareMetaEntry {
    /// Fingerprint of the share payload.
    pub share_fp: Fingerprint,
    /// Index of the secret this share belongs to.
    pub secret_id: i32,
    /// Size of that secret.
    pub secret_size: i32,
    /// Size of the share payload.
    pub share_size: i32,
}

impl ShareMetaEntry {
    /// Parse one entry from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        need("share meta entry", buf, SHARE_META_ENTRY_SIZE)?;
        Ok(ShareMetaEntry {
            share_fp: Fingerprint::from_slice(&buf[0..FP_SIZE])?,
            secret_id: get_i32(buf, FP_SIZE),
            secret_size: get_i32(buf, FP_SIZE + 4),
            share_size: get_i32(buf, FP_SIZE + 8),
        })
    }

    /// Serialize the entry.
    pub fn to_bytes(&self) -> [u8; SHARE_META_ENTRY_SIZE] {
        let mut buf = [0u8; SHARE_META_ENTRY_SIZE];
        buf[0..FP_SIZE].copy_from_slice(self.share_fp.as_bytes());
        buf[FP_SIZE..FP_SIZE + 4].copy_from_slice(&self.secret_id.to_le_bytes());
        buf[FP_SIZE + 4..FP_SIZE + 8].copy_from_slice(&self.secret_size.to_le_bytes());
        buf[FP_SIZE + 8..FP_SIZE + 12].copy_from_slice(&self.share_size.to_le_bytes());
        buf
    }
}

/// Fully parsed file-share metadata: head, full file name and one entry per
/// coming share.
#[derive(Debug, Clone)]
pub struct ShareMeta<'a> {
    /// The fragment head.
    pub head: FileShareMetaHead,
    /// Full file name, prefix path included.
    pub full_file_name: &'a str,
    /// One entry per coming share, in upload order.
    pub entries: Vec<ShareMetaEntry>,
}

impl<'a> ShareMeta<'a> {
    /// Parse a metadata buffer: `[head ‖ full file name ‖ entries…]`.
    pub fn parse(buf: &'a [u8]) -> Result<Self, ProtoError> {
        let head = FileShareMetaHead::parse(buf)?;
        let name_len = usize::try_from(head.full_name_size).map_err(|_| {
            ProtoError::NegativeSize {
                what: "file share meta name size",
                value: head.full_name_size as i64,
            }
        })?;
        let coming = usize::try_from(head.num_of_coming_secrets).unwrap_or(0);
        let expect = FILE_SHARE_META_HEAD_SIZE + name_len + coming * SHARE_META_ENTRY_SIZE;
        if buf.len() != expect {
            return Err(ProtoError::CountMismatch {
                what: "file share meta",
                declared: expect,
                actual: buf.len(),
            });
        }

        let name_bytes = &buf[FILE_SHARE_META_HEAD_SIZE..FILE_SHARE_META_HEAD_SIZE + name_len];
        let full_file_name =
            std::str::from_utf8(name_bytes).map_err(|_| ProtoError::BadFileNameEncoding)?;

        let mut entries = Vec::with_capacity(coming);
        let mut off = FILE_SHARE_META_HEAD_SIZE + name_len;
        for _ in 0..coming {
            let entry = ShareMetaEntry::parse(&buf[off..off + SHARE_META_ENTRY_SIZE])?;
            if entry.share_size < 0 {
                return Err(ProtoError::NegativeSize {
                    what: "share meta entry share size",
                    value: entry.share_size as i64,
                });
            }
            entries.push(entry);
            off += SHARE_META_ENTRY_SIZE;
        }

        Ok(ShareMeta {
            head,
            full_file_name,
            entries,
        })
    }

    /// Serialize head, name and entries back into one buffer. Used by
    /// clients and tests; the server only parses.
    pub fn encode(
        head: &FileShareMetaHead,
        full_file_name: &str,
        entries: &[ShareMetaEntry],
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            FILE_SHARE_META_HEAD_SIZE
                + full_file_name.len()
                + entries.len() * SHARE_META_ENTRY_SIZE,
        );
        buf.extend_from_slice(&head.to_bytes());
        buf.extend_from_slice(full_file_name.as_bytes());
        for entry in entries {
            buf.extend_from_slice(&entry.to_bytes());
        }
        buf
    }
}

/// Head of a share index value.
///
/// When `delta_depth` is zero the payload at `(container_name, offset,
/// share_size)` holds the raw share and `base_fp` is all-zero. Otherwise
/// the payload at `(container_name, offset, delta_size)` is a delta against
/// the share identified by `base_fp`, and `share_size` is the logical size
/// of the decoded share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareIndexHead {
    /// Logical size of the share payload.
    pub share_size: i32,
    /// Number of user reference entries that follow.
    pub num_of_users: i32,
    /// Length of the delta chain below this share; zero for raw shares.
    pub delta_depth: u8,
    /// Stored delta size; zero for raw shares.
    pub delta_size: u64,
    /// Fingerprint of the delta base; all-zero for raw shares.
    pub base_fp: Fingerprint,
    /// Container holding the payload.
    pub container_name: ContainerName,
    /// Offset of the payload within the container.
    pub offset: u64,
}

impl ShareIndexHead {
    /// Parse a head from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        need("share index head", buf, SHARE_INDEX_HEAD_SIZE)?;
        let mut off = 0;
        let share_size = get_i32(buf, off);
        off += 4;
        let num_of_users = get_i32(buf, off);
        off += 4;
        let delta_depth = buf[off];
        off += 1;
        let delta_size = get_u64(buf, off);
        off += 8;
        let base_fp = Fingerprint::from_slice(&buf[off..off + FP_SIZE])?;
        off += FP_SIZE;
        let container_name = ContainerName::from_slice(&buf[off..off + CONTAINER_NAME_SIZE])?;
        off += CONTAINER_NAME_SIZE;
        let offset = get_u64(buf, off);
        Ok(ShareIndexHead {
            share_size,
            num_of_users,
            delta_depth,
            delta_size,
            base_fp,
            container_name,
            offset,
        })
    }

    /// Serialize the head.
    pub fn to_bytes(&self) -> [u8; SHARE_INDEX_HEAD_SIZE] {
        let mut buf = [0u8; SHARE_INDEX_HEAD_SIZE];
        let mut off = 0;
        buf[off..off + 4].copy_from_slice(&self.share_size.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.num_of_users.to_le_bytes());
        off += 4;
        buf[off] = self.delta_depth;
        off += 1;
        buf[off..off + 8].copy_from_slice(&self.delta_size.to_le_bytes());
        off += 8;
        buf[off..off + FP_SIZE].copy_from_slice(self.base_fp.as_bytes());
        off += FP_SIZE;
        buf[off..off + CONTAINER_NAME_SIZE].copy_from_slice(self.container_name.as_bytes());
        off += CONTAINER_NAME_SIZE;
        buf[off..off + 8].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }
}

/// A share index value: head plus the list of owning users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareIndexValue {
    /// Value head.
    pub head: ShareIndexHead,
    /// Owning user ids, no duplicates.
    pub users: Vec<UserId>,
}

impl ShareIndexValue {
    /// Build a fresh value with a single owner.
    pub fn new(head: ShareIndexHead, user_id: UserId) -> Self {
        let mut head = head;
        head.num_of_users = 1;
        ShareIndexValue {
            head,
            users: vec![user_id],
        }
    }

    /// Parse a value: `[head ‖ user ref…]` with the count taken from the
    /// head.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        let head = ShareIndexHead::parse(buf)?;
        let declared = usize::try_from(head.num_of_users).unwrap_or(0);
        let expect = SHARE_INDEX_HEAD_SIZE + declared * SHARE_USER_REF_SIZE;
        if buf.len() != expect {
            return Err(ProtoError::CountMismatch {
                what: "share index value",
                declared: expect,
                actual: buf.len(),
            });
        }
        let mut users = Vec::with_capacity(declared);
        let mut off = SHARE_INDEX_HEAD_SIZE;
        for _ in 0..declared {
            users.push(get_i32(buf, off));
            off += SHARE_USER_REF_SIZE;
        }
        Ok(ShareIndexValue { head, users })
    }

    /// Serialize head and user refs.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(SHARE_INDEX_HEAD_SIZE + self.users.len() * SHARE_USER_REF_SIZE);
        buf.extend_from_slice(&self.head.to_bytes());
        for user in &self.users {
            buf.extend_from_slice(&user.to_le_bytes());
        }
        buf
    }

    /// True if `user_id` already owns this share.
    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.users.contains(&user_id)
    }

    /// Append a user reference and bump the head count.
    pub fn push_user(&mut self, user_id: UserId) {
        self.users.push(user_id);
        self.head.num_of_users += 1;
    }
}

/// Head of a file recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecipeHead {
    /// Owning user.
    pub user_id: UserId,
    /// Logical size of the original file.
    pub file_size: i64,
    /// Number of recipe entries written so far; equals the declared total
    /// once the recipe is finished.
    pub num_of_shares: i32,
}

impl FileRecipeHead {
    /// Parse a head from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        need("file recipe head", buf, FILE_RECIPE_HEAD_SIZE)?;
        Ok(FileRecipeHead {
            user_id: get_i32(buf, 0),
            file_size: get_i64(buf, 4),
            num_of_shares: get_i32(buf, 12),
        })
    }

    /// Serialize the head.
    pub fn to_bytes(&self) -> [u8; FILE_RECIPE_HEAD_SIZE] {
        let mut buf = [0u8; FILE_RECIPE_HEAD_SIZE];
        buf[0..4].copy_from_slice(&self.user_id.to_le_bytes());
        buf[4..12].copy_from_slice(&self.file_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_of_shares.to_le_bytes());
        buf
    }
}

/// One entry of a file recipe, sufficient to restore one share in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecipeEntry {
    /// Fingerprint of the share.
    pub share_fp: Fingerprint,
    /// Index of the secret this share belongs to.
    pub secret_id: i32,
    /// Size of that secret.
    pub secret_size: i32,
    /// Size of the share payload.
    pub share_size: i32,
}

impl FileRecipeEntry {
    /// Parse one entry from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        need("file recipe entry", buf, FILE_RECIPE_ENTRY_SIZE)?;
        Ok(FileRecipeEntry {
            share_fp: Fingerprint::from_slice(&buf[0..FP_SIZE])?,
            secret_id: get_i32(buf, FP_SIZE),
            secret_size: get_i32(buf, FP_SIZE + 4),
            share_size: get_i32(buf, FP_SIZE + 8),
        })
    }

    /// Serialize the entry.
    pub fn to_bytes(&self) -> [u8; FILE_RECIPE_ENTRY_SIZE] {
        let mut buf = [0u8; FILE_RECIPE_ENTRY_SIZE];
        buf[0..FP_SIZE].copy_from_slice(self.share_fp.as_bytes());
        buf[FP_SIZE..FP_SIZE + 4].copy_from_slice(&self.secret_id.to_le_bytes());
        buf[FP_SIZE + 4..FP_SIZE + 8].copy_from_slice(&self.secret_size.to_le_bytes());
        buf[FP_SIZE + 8..FP_SIZE + 12].copy_from_slice(&self.share_size.to_le_bytes());
        buf
    }

    /// Parse a complete recipe buffer into its head and entries.
    pub fn parse_recipe(buf: &[u8]) -> Result<(FileRecipeHead, Vec<FileRecipeEntry>), ProtoError> {
        let head = FileRecipeHead::parse(buf)?;
        let declared = usize::try_from(head.num_of_shares).unwrap_or(0);
        let expect = FILE_RECIPE_HEAD_SIZE + declared * FILE_RECIPE_ENTRY_SIZE;
        if buf.len() != expect {
            return Err(ProtoError::CountMismatch {
                what: "file recipe",
                declared: expect,
                actual: buf.len(),
            });
        }
        let mut entries = Vec::with_capacity(declared);
        let mut off = FILE_RECIPE_HEAD_SIZE;
        for _ in 0..declared {
            entries.push(FileRecipeEntry::parse(&buf[off..off + FILE_RECIPE_ENTRY_SIZE])?);
            off += FILE_RECIPE_ENTRY_SIZE;
        }
        Ok((head, entries))
    }
}

/// Head of the restored share file streamed back on download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareFileHead {
    /// Logical size of the original file.
    pub file_size: i64,
    /// Number of shares that follow.
    pub num_of_shares: i32,
}

impl ShareFileHead {
    /// Parse a head from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        need("share file head", buf, SHARE_FILE_HEAD_SIZE)?;
        Ok(ShareFileHead {
            file_size: get_i64(buf, 0),
            num_of_shares: get_i32(buf, 8),
        })
    }

    /// Serialize the head.
    pub fn to_bytes(&self) -> [u8; SHARE_FILE_HEAD_SIZE] {
        let mut buf = [0u8; SHARE_FILE_HEAD_SIZE];
        buf[0..8].copy_from_slice(&self.file_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_of_shares.to_le_bytes());
        buf
    }
}

/// Per-share entry of the restored share file, followed by the share bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareEntry {
    /// Index of the secret this share belongs to.
    pub secret_id: i32,
    /// Size of that secret.
    pub secret_size: i32,
    /// Size of the share bytes that follow.
    pub share_size: i32,
}

impl ShareEntry {
    /// Parse one entry from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        need("share entry", buf, SHARE_ENTRY_SIZE)?;
        Ok(ShareEntry {
            secret_id: get_i32(buf, 0),
            secret_size: get_i32(buf, 4),
            share_size: get_i32(buf, 8),
        })
    }

    /// Serialize the entry.
    pub fn to_bytes(&self) -> [u8; SHARE_ENTRY_SIZE] {
        let mut buf = [0u8; SHARE_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.secret_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.secret_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.share_size.to_le_bytes());
        buf
    }
}
