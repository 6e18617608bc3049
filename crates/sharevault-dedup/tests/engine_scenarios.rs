//! End-to-end engine scenarios: upload rounds driven through the two-stage
//! pipeline exactly as a session would, then restored and compared byte
//! for byte.

use sharevault_dedup::{recipe_fingerprint, share_fingerprint, DedupConfig, DedupCore};
use sharevault_proto::{
    FileRecipeEntry, FileShareMetaHead, IndexKey, KeyPrefix, ShareEntry, ShareFileHead,
    ShareIndexValue, ShareMeta, ShareMetaEntry, UserId, SHARE_ENTRY_SIZE, SHARE_FILE_HEAD_SIZE,
};
use sharevault_storage::{Backend, BackendConfig};
use tempfile::tempdir;

fn engine(dir: &std::path::Path) -> DedupCore {
    let db_dir = dir.join("db");
    let container_dir = dir.join("containers");
    std::fs::create_dir_all(&db_dir).unwrap();
    std::fs::create_dir_all(&container_dir).unwrap();
    let backend = Backend::open(BackendConfig {
        db_dir,
        container_dir,
        container_size: 256 << 10,
        container_cache_size: 16,
        recipe_cache_size: 3,
        batch_size: 32,
    })
    .unwrap();
    DedupCore::new(backend, DedupConfig::default())
}

fn meta_for(name: &str, past: usize, shares: &[&[u8]], total_size: i64) -> Vec<u8> {
    let entries: Vec<ShareMetaEntry> = shares
        .iter()
        .enumerate()
        .map(|(i, data)| ShareMetaEntry {
            share_fp: share_fingerprint(data),
            secret_id: (past + i) as i32,
            secret_size: 16,
            share_size: data.len() as i32,
        })
        .collect();
    let head = FileShareMetaHead {
        full_name_size: name.len() as i32,
        file_size: total_size,
        num_of_past_secrets: past as i32,
        size_of_past_secrets: 0,
        num_of_coming_secrets: shares.len() as i32,
        size_of_coming_secrets: shares.iter().map(|s| s.len() as i64).sum(),
    };
    ShareMeta::encode(&head, name, &entries)
}

/// Run one upload round the way a session does: first stage, then a data
/// payload holding only the non-duplicate shares, then second stage.
fn upload_fragment(
    core: &DedupCore,
    user_id: UserId,
    name: &str,
    past: usize,
    total: usize,
    shares: &[&[u8]],
    file_size: i64,
) -> Vec<bool> {
    let meta = meta_for(name, past, shares, file_size);
    let dup_status = core.first_stage_dedup(user_id, &meta).unwrap();
    let mut data = Vec::new();
    for (share, dup) in shares.iter().zip(&dup_status) {
        if !dup {
            data.extend_from_slice(share);
        }
    }
    core.second_stage_dedup(user_id, &meta, &data, &dup_status, total)
        .unwrap();
    dup_status
}

fn upload(core: &DedupCore, user_id: UserId, name: &str, shares: &[&[u8]]) -> Vec<bool> {
    let file_size = 16 * shares.len() as i64;
    upload_fragment(core, user_id, name, 0, shares.len(), shares, file_size)
}

fn download(core: &DedupCore, user_id: UserId, name: &str) -> Vec<u8> {
    let mut buf = vec![0u8; 1 << 20];
    let mut out = Vec::new();
    core.restore_share_file(user_id, name, &mut buf, &mut |chunk| {
        out.extend_from_slice(chunk);
        Ok(())
    })
    .unwrap();
    out
}

fn share_index(core: &DedupCore, data: &[u8]) -> ShareIndexValue {
    let key = IndexKey::new(KeyPrefix::ShareIndex, &share_fingerprint(data));
    ShareIndexValue::parse(&core.backend().get_index(&key).unwrap().unwrap()).unwrap()
}

fn payload(len: usize, modulus: u8) -> Vec<u8> {
    (0..len).map(|i| (i % modulus as usize) as u8).collect()
}

#[test]
fn unique_upload_lands_in_the_first_container() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(4096, 251);
    let b = payload(4096, 239);
    upload(&core, 1, "/a.bin", &[&a, &b]);

    let idx_a = share_index(&core, &a);
    let idx_b = share_index(&core, &b);
    assert_eq!(idx_a.head.container_name.as_bytes(), b"aaaaaaaaaaaaaaaa");
    assert_eq!(idx_a.head.offset, 0);
    assert_eq!(idx_b.head.offset, 4096);
    assert_eq!(idx_a.head.num_of_users, 1);
    assert_eq!(idx_b.head.num_of_users, 1);
    assert_eq!(idx_a.head.delta_depth, 0);
    assert!(idx_a.head.base_fp.is_zero());

    // the recipe sits under SHA256(formatted name ‖ user id)
    let recipe_key = IndexKey::new(KeyPrefix::Recipe, &recipe_fingerprint("/a.bin", 1));
    let recipe = core.backend().get_recipe_data(&recipe_key).unwrap();
    let (head, entries) = FileRecipeEntry::parse_recipe(&recipe).unwrap();
    assert_eq!(head.user_id, 1);
    assert_eq!(head.file_size, 32);
    assert_eq!(head.num_of_shares, 2);
    assert_eq!(entries[0].share_fp, share_fingerprint(&a));
    assert_eq!(entries[1].share_fp, share_fingerprint(&b));
}

#[test]
fn reupload_by_the_same_user_changes_nothing() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(4096, 251);
    let b = payload(4096, 239);
    upload(&core, 1, "/a.bin", &[&a, &b]);
    let before_a = share_index(&core, &a);

    let dup_status = upload(&core, 1, "/a.bin", &[&a, &b]);
    assert_eq!(dup_status, vec![true, true]);

    let after_a = share_index(&core, &a);
    assert_eq!(after_a, before_a);
    assert_eq!(after_a.head.num_of_users, 1);
}

#[test]
fn upload_by_a_second_user_adds_references() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(4096, 251);
    let b = payload(4096, 239);
    upload(&core, 1, "/a.bin", &[&a, &b]);

    let dup_status = upload(&core, 2, "/a.bin", &[&a, &b]);
    assert_eq!(dup_status, vec![false, false]);

    for data in [&a, &b] {
        let idx = share_index(&core, data);
        assert_eq!(idx.head.num_of_users, 2);
        assert!(idx.contains_user(1));
        assert!(idx.contains_user(2));
    }

    // each user has their own recipe
    let key1 = IndexKey::new(KeyPrefix::Recipe, &recipe_fingerprint("/a.bin", 1));
    let key2 = IndexKey::new(KeyPrefix::Recipe, &recipe_fingerprint("/a.bin", 2));
    assert_ne!(key1, key2);
    assert!(core.backend().get_recipe_data(&key1).is_ok());
    assert!(core.backend().get_recipe_data(&key2).is_ok());
}

#[test]
fn similar_share_is_stored_as_a_delta() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(8192, 251);
    upload(&core, 1, "/a.bin", &[&a]);

    let mut c = a.clone();
    c[42] ^= 0x01;
    c[77] ^= 0x80;
    upload(&core, 1, "/c.bin", &[&c]);

    let idx_c = share_index(&core, &c);
    assert_eq!(idx_c.head.delta_depth, 1);
    assert_eq!(idx_c.head.base_fp, share_fingerprint(&a));
    assert!(idx_c.head.delta_size < c.len() as u64);

    // and restores to the exact uploaded bytes
    let mut out = vec![0u8; c.len()];
    core.restore_share(&share_fingerprint(&c), &mut out).unwrap();
    assert_eq!(out, c);
}

#[test]
fn download_reproduces_the_uploaded_stream() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(8192, 251);
    let b = payload(4096, 239);
    let mut c = a.clone();
    c[100] ^= 0xff;

    upload(&core, 1, "/mix.bin", &[&a, &b, &c]);
    let stream = download(&core, 1, "/mix.bin");

    // head, then entry ‖ bytes per share in order
    let head = ShareFileHead::parse(&stream).unwrap();
    assert_eq!(head.num_of_shares, 3);
    assert_eq!(head.file_size, 48);

    let mut off = SHARE_FILE_HEAD_SIZE;
    for (i, share) in [&a, &b, &c].into_iter().enumerate() {
        let entry = ShareEntry::parse(&stream[off..]).unwrap();
        assert_eq!(entry.secret_id, i as i32);
        assert_eq!(entry.share_size as usize, share.len());
        off += SHARE_ENTRY_SIZE;
        assert_eq!(&stream[off..off + share.len()], share.as_slice());
        off += share.len();
    }
    assert_eq!(off, stream.len());
}

#[test]
fn depth_bound_forces_raw_storage() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(8192, 251);
    upload(&core, 1, "/a.bin", &[&a]);

    let mut c = a.clone();
    c[0] ^= 0xff;
    upload(&core, 1, "/c.bin", &[&c]);
    assert_eq!(share_index(&core, &c).head.delta_depth, 1);

    // d's best base is c, which already sits at the depth bound
    let mut d = c.clone();
    d[1] ^= 0xff;
    upload(&core, 1, "/d.bin", &[&d]);
    let idx_d = share_index(&core, &d);
    assert_eq!(idx_d.head.delta_depth, 0);
    assert!(idx_d.head.base_fp.is_zero());

    let mut out = vec![0u8; d.len()];
    core.restore_share(&share_fingerprint(&d), &mut out).unwrap();
    assert_eq!(out, d);
}

#[test]
fn multi_fragment_upload_finishes_the_recipe_once() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let shares: Vec<Vec<u8>> = (0..3).map(|i| payload(4096, 241 - i as u8)).collect();
    let refs: Vec<&[u8]> = shares.iter().map(|s| s.as_slice()).collect();

    upload_fragment(&core, 1, "/frag.bin", 0, 3, &refs[0..2], 48);

    // recipe not finished yet
    let recipe_key = IndexKey::new(KeyPrefix::Recipe, &recipe_fingerprint("/frag.bin", 1));
    assert!(core.backend().get_recipe_data(&recipe_key).is_err());

    upload_fragment(&core, 1, "/frag.bin", 2, 3, &refs[2..3], 48);
    let recipe = core.backend().get_recipe_data(&recipe_key).unwrap();
    let (head, entries) = FileRecipeEntry::parse_recipe(&recipe).unwrap();
    assert_eq!(head.num_of_shares, 3);
    assert_eq!(entries.len(), 3);

    let stream = download(&core, 1, "/frag.bin");
    let mut off = SHARE_FILE_HEAD_SIZE;
    for share in &shares {
        off += SHARE_ENTRY_SIZE;
        assert_eq!(&stream[off..off + share.len()], share.as_slice());
        off += share.len();
    }
}

#[test]
fn payload_size_mismatch_is_a_protocol_error() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(4096, 251);
    let meta = meta_for("/a.bin", 0, &[&a], 16);
    let dup_status = core.first_stage_dedup(1, &meta).unwrap();
    assert_eq!(dup_status, vec![false]);

    // short payload: 100 bytes missing
    let result = core.second_stage_dedup(1, &meta, &a[..3996], &dup_status, 1);
    assert!(result.is_err());
}

#[test]
fn leading_slash_is_optional_in_file_names() {
    let dir = tempdir().unwrap();
    let core = engine(dir.path());

    let a = payload(4096, 251);
    upload(&core, 1, "a.bin", &[&a]);
    // the recipe was stored under the normalized name
    let stream = download(&core, 1, "/a.bin");
    assert_eq!(&stream[SHARE_FILE_HEAD_SIZE + SHARE_ENTRY_SIZE..], a.as_slice());
}
