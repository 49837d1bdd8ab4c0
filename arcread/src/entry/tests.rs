use super::*;

#[test]
fn file_type_bits() {
    let mut e = Entry::new();
    assert_eq!(e.file_type(), None);
    e.set_mode(0o100644);
    assert!(e.is_file());
    assert_eq!(e.perm(), 0o644);
    e.set_file_type(Some(FileType::Directory));
    assert_eq!(e.mode(), 0o040644);
    e.set_perm(0o755);
    assert_eq!(e.mode(), 0o040755);
    e.set_file_type(None);
    assert_eq!(e.mode(), 0o755);
}

#[test]
fn device_split() {
    let dev = Device::from_raw(0x0803);
    assert_eq!(dev, Device::new(8, 3));
    assert_eq!(dev.to_raw(), 0x0803);

    let big = Device::new(0x1234, 0x56789);
    assert_eq!(Device::from_raw(big.to_raw()), big);
}

#[test]
fn sparse_runs_merge() {
    let mut e = Entry::new();
    e.add_sparse(0, 10);
    e.add_sparse(10, 5);
    e.add_sparse(20, 0);
    e.add_sparse(100, 1);
    assert_eq!(
        e.sparse(),
        [
            SparseRun {
                offset: 0,
                length: 15
            },
            SparseRun {
                offset: 100,
                length: 1
            },
        ]
    );
}

#[test]
fn clear_resets_everything() {
    let mut e = Entry::new();
    e.set_pathname("a/b");
    e.set_symlink("c");
    e.set_size(Some(3));
    e.add_xattr("user.k", b"v".to_vec());
    e.acl_add(AclType::DEFAULT, AclTag::Other, 4, None, None);
    e.clear();
    assert_eq!(e.pathname(), "");
    assert_eq!(e.symlink(), None);
    assert_eq!(e.size(), None);
    assert_eq!(e.xattrs().len(), 0);
    assert_eq!(e.acl_count(AclType::ALL), 0);
}

#[test]
fn acl_base_entries_live_in_mode() {
    let mut e = Entry::new();
    e.set_mode(0o100000);
    e.acl_add(AclType::ACCESS, AclTag::UserObj, 7, None, None);
    e.acl_add(AclType::ACCESS, AclTag::GroupObj, 5, None, None);
    e.acl_add(AclType::ACCESS, AclTag::Other, 4, None, None);
    assert_eq!(e.mode(), 0o100754);
    // No extended entries, so no ACL to speak of.
    assert_eq!(e.acl_count(AclType::ACCESS), 0);
    assert_eq!(e.acl_entries(AclType::ACCESS).count(), 0);

    e.acl_add(AclType::ACCESS, AclTag::User, 6, Some(1000), Some(&b"alice"[..]));
    assert_eq!(e.acl_count(AclType::ACCESS), 4);
    let all = e.acl_entries(AclType::ACCESS).collect::<Vec<_>>();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].tag, AclTag::UserObj);
    assert_eq!(all[0].perm, 7);
    assert_eq!(all[2].tag, AclTag::Other);
    assert_eq!(all[3].name, Some(BString::from("alice")));

    // Re-adding updates in place.
    e.acl_add(AclType::ACCESS, AclTag::User, 4, Some(1000), Some(&b"alice"[..]));
    assert_eq!(e.acl_count(AclType::ACCESS), 4);
    assert_eq!(e.acl_entries(AclType::ACCESS).nth(3).unwrap().perm, 4);
}

#[test]
fn acl_text() {
    let mut e = Entry::new();
    let text = b"user::rwx,user:bob:r--:1001,group::r-x,group:staff:rw-,mask::rwx,other::---\n\
                 default:user::rwx,d:g:100:r-x";
    assert!(e.acl_parse_text(text, AclType::ACCESS));
    assert_eq!(e.perm(), 0o750);
    assert_eq!(e.acl_count(AclType::ACCESS), 6);
    assert_eq!(e.acl_count(AclType::DEFAULT), 2);

    let access = e.acl_entries(AclType::ACCESS).collect::<Vec<_>>();
    assert_eq!(access[3].tag, AclTag::User);
    assert_eq!(access[3].id, Some(1001));
    assert_eq!(access[3].name, Some(BString::from("bob")));
    assert_eq!(access[4].tag, AclTag::Group);
    assert_eq!(access[4].id, None);
    assert_eq!(access[5].tag, AclTag::Mask);

    let default = e.acl_entries(AclType::DEFAULT).collect::<Vec<_>>();
    assert_eq!(default[0].tag, AclTag::UserObj);
    assert_eq!(default[1].tag, AclTag::Group);
    assert_eq!(default[1].id, Some(100));
    assert_eq!(default[1].perm, 5);
}

#[test]
fn acl_text_solaris_and_garbage() {
    let mut e = Entry::new();
    assert!(e.acl_parse_text(b"user::rw-,group::r--,mask:r--,other:r--", AclType::ACCESS));
    assert_eq!(e.perm(), 0o644);
    // The mask plus the three entries mirroring the mode.
    assert_eq!(e.acl_count(AclType::ALL), 4);

    assert!(!e.acl_parse_text(b"user:x:rwz,bogus::r", AclType::ACCESS));
}
