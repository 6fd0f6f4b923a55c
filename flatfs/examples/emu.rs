use flatfs::{DirCursor, FlatFs};

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let tmp = tempfile::NamedTempFile::new()?;

    // create a new flat fs on the image and write a file
    let mut fs = FlatFs::mksfs(tmp.path(), true)?;
    let fd = fs.open("hello.txt")?;
    fs.write(fd, b"hello from a flat file system\n")?;
    fs.close(fd)?;
    drop(fs);

    // remount and read it back
    let mut fs = FlatFs::mksfs(tmp.path(), false)?;
    let mut cursor = DirCursor::new();
    while let Some(name) = fs.next_name(&mut cursor) {
        println!("{} ({} bytes)", name, fs.stat_size(name)?);
    }

    let fd = fs.open("hello.txt")?;
    fs.seek(fd, 0)?;
    let mut buf = vec![0; fs.stat_size("hello.txt")?];
    fs.read(fd, &mut buf)?;
    print!("{}", String::from_utf8_lossy(&buf));
    println!("{:?}", fs.stats());
    Ok(())
}
