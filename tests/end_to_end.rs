//! End-to-end scenarios driven entirely through the path-addressed facade,
//! exercising a single image across several operations the way an adapter
//! would.

use imagefs::{Filesystem, ImageOptions};
use tempfile::NamedTempFile;

fn fresh_fs() -> Filesystem {
    let tmp = NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();
    std::mem::forget(tmp);
    Filesystem::open_or_create(path, &ImageOptions::default()).unwrap()
}

#[test]
fn fresh_image_has_a_root_directory() {
    let fs = fresh_fs();
    let st = fs.stat("/").unwrap();
    assert_eq!(st.ino, 0);
    assert_eq!(st.mode & libc::S_IFMT as u32, libc::S_IFDIR as u32);
    assert_eq!(st.nlink, 1);
}

#[test]
fn basic_write_then_read() {
    let mut fs = fresh_fs();
    fs.mknod("/greeting", 0o100644).unwrap();
    fs.write("/greeting", b"hello, image", 0).unwrap();

    let mut buf = [0u8; 64];
    let n = fs.read("/greeting", &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"hello, image");
}

#[test]
fn directory_with_child_is_listable() {
    let mut fs = fresh_fs();
    fs.mknod("/docs", libc::S_IFDIR as u32 | 0o755).unwrap();
    fs.mknod("/docs/readme", 0o100644).unwrap();
    fs.write("/docs/readme", b"contents", 0).unwrap();

    let entries = fs.list("/docs").unwrap();
    let readme = entries.iter().find(|e| e.name == b"readme").unwrap();
    assert_eq!(readme.stat.size, 8);

    let dot = entries.iter().find(|e| e.name == b".").unwrap();
    assert_eq!(dot.stat.ino, fs.get_inum("/docs").unwrap());
    let dotdot = entries.iter().find(|e| e.name == b"..").unwrap();
    assert_eq!(dotdot.stat.ino, 0);
}

#[test]
fn large_write_crosses_indirect_boundary_then_truncate_frees_everything() {
    let mut fs = fresh_fs();
    fs.mknod("/big", 0o100644).unwrap();

    let block_size = 4096u64;
    let direct_capacity = block_size * 12;
    let data = vec![0xabu8; (direct_capacity + block_size + 1) as usize];
    fs.write("/big", &data, 0).unwrap();

    let st = fs.stat("/big").unwrap();
    assert_eq!(st.size, data.len() as u64);

    let mut buf = vec![0u8; data.len()];
    let n = fs.read("/big", &mut buf, 0).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(buf, data);

    fs.truncate("/big", 0).unwrap();
    assert_eq!(fs.stat("/big").unwrap().size, 0);

    let mut buf = [0u8; 1];
    assert_eq!(fs.read("/big", &mut buf, 0).unwrap(), 0);
}

#[test]
fn hard_link_survives_original_removal() {
    let mut fs = fresh_fs();
    fs.mknod("/a", 0o100644).unwrap();
    fs.write("/a", b"payload", 0).unwrap();
    fs.link("/a", "/b").unwrap();
    assert_eq!(fs.stat("/a").unwrap().nlink, 2);

    fs.unlink("/a").unwrap();
    assert!(fs.get_inum("/a").is_err());

    let mut buf = [0u8; 7];
    let n = fs.read("/b", &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"payload");
    assert_eq!(fs.stat("/b").unwrap().nlink, 1);
}

#[test]
fn rename_moves_content_to_the_new_name() {
    let mut fs = fresh_fs();
    fs.mknod("/src", 0o100644).unwrap();
    fs.write("/src", b"moved", 0).unwrap();

    fs.rename("/src", "/dst").unwrap();

    assert!(fs.get_inum("/src").is_err());
    let mut buf = [0u8; 5];
    let n = fs.read("/dst", &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"moved");
}

#[test]
fn reopening_an_existing_image_preserves_its_content() {
    let tmp = NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();
    std::mem::forget(tmp);

    {
        let mut fs = Filesystem::open_or_create(&path, &ImageOptions::default()).unwrap();
        fs.mknod("/persisted", 0o100644).unwrap();
        fs.write("/persisted", b"still here", 0).unwrap();
        fs.sync().unwrap();
    }

    let fs = Filesystem::open_or_create(&path, &ImageOptions::default()).unwrap();
    let mut buf = [0u8; 10];
    let n = fs.read("/persisted", &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"still here");
}
