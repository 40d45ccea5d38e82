//! Memory-mapped files: round-trips, write-back, preconditions, rollback.

use silica_abi::{number::Syscall, MAP_FAILED};
use silica_kernel::{
    memory::{PAGE_SIZE, STACK_LIMIT},
    process::{Exited, UserEnv},
    Kernel, KernelConfig,
};

const MAP_BASE: usize = 0x1000_0000;

fn call(env: &mut UserEnv<'_>, call: Syscall, args: &[u32]) -> Result<u32, Exited> {
    env.syscall(call as u32, args)
}

fn push_cstr(env: &mut UserEnv<'_>, s: &str) -> u32 {
    let addr = env.esp() - (s.len() + 1);
    env.set_esp(addr);
    env.write_bytes(addr, s.as_bytes()).unwrap();
    env.write_bytes(addr + s.len(), &[0]).unwrap();
    addr as u32
}

fn open(env: &mut UserEnv<'_>, name: &str) -> u32 {
    let name = push_cstr(env, name);
    let fd = call(env, Syscall::Open, &[name]).unwrap();
    assert_ne!(fd as i32, -1, "open failed");
    fd
}

/// Seed a file with `contents` straight through the filesystem.
fn seed_file(kernel: &Kernel, name: &str, contents: &[u8]) {
    let mut fs = kernel.filesys.lock();
    assert!(fs.create(name, contents.len()));
    let file = fs.open(name).unwrap();
    assert_eq!(file.write_at(0, contents), contents.len());
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn file_contents_are_visible_and_writes_flow_back() {
    // A file of two full pages plus a partial third.
    let len = 2 * PAGE_SIZE + 100;
    let bytes = pattern(len);
    let kernel = Kernel::new(KernelConfig::default());
    seed_file(&kernel, "data", &bytes);

    let expected = bytes.clone();
    kernel.register_program("main", move |env| {
        let fd = open(env, "data");
        let id = call(env, Syscall::Mmap, &[fd, MAP_BASE as u32]).unwrap();
        assert_ne!(id, MAP_FAILED);

        // Every byte of the file is readable through the mapping.
        let mut got = vec![0u8; len];
        env.read_bytes(MAP_BASE, &mut got).unwrap();
        assert_eq!(got, expected);

        // The tail of the last page reads as zero.
        let mut tail = [0u8; 16];
        env.read_bytes(MAP_BASE + len, &mut tail).unwrap();
        assert_eq!(tail, [0u8; 16]);

        // Modify bytes in each page, then unmap.
        env.write_bytes(MAP_BASE + 10, b"first").unwrap();
        env.write_bytes(MAP_BASE + PAGE_SIZE, b"second").unwrap();
        env.write_bytes(MAP_BASE + 2 * PAGE_SIZE + 50, b"third").unwrap();
        assert_eq!(call(env, Syscall::Munmap, &[id]).unwrap(), 0);

        let _ = call(env, Syscall::Exit, &[0]);
    });

    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), 0);

    // On-disk contents reflect the modifications and only those.
    let mut expect = bytes;
    expect[10..15].copy_from_slice(b"first");
    expect[PAGE_SIZE..PAGE_SIZE + 6].copy_from_slice(b"second");
    expect[2 * PAGE_SIZE + 50..2 * PAGE_SIZE + 55].copy_from_slice(b"third");

    let fs = kernel.filesys.lock();
    let file = fs.open("data").unwrap();
    let mut disk = vec![0u8; len];
    assert_eq!(file.read_at(0, &mut disk), len);
    assert_eq!(disk, expect);
}

#[test]
fn second_page_write_lands_at_page_size_offset() {
    let len = 2 * PAGE_SIZE;
    let kernel = Kernel::new(KernelConfig::default());
    seed_file(&kernel, "two", &vec![0u8; len]);

    kernel.register_program("main", |env| {
        let fd = open(env, "two");
        let id = call(env, Syscall::Mmap, &[fd, MAP_BASE as u32]).unwrap();
        assert_ne!(id, MAP_FAILED);
        env.write_bytes(MAP_BASE + PAGE_SIZE, &[0x5E]).unwrap();
        assert_eq!(call(env, Syscall::Munmap, &[id]).unwrap(), 0);
        let _ = call(env, Syscall::Exit, &[0]);
    });

    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), 0);

    let fs = kernel.filesys.lock();
    let file = fs.open("two").unwrap();
    let mut byte = [0u8; 1];
    assert_eq!(file.read_at(PAGE_SIZE, &mut byte), 1);
    assert_eq!(byte[0], 0x5E);
    assert_eq!(file.read_at(0, &mut byte), 1);
    assert_eq!(byte[0], 0);
}

#[test]
fn mapping_outlives_its_descriptor() {
    let kernel = Kernel::new(KernelConfig::default());
    seed_file(&kernel, "f", b"mapped!");

    kernel.register_program("main", |env| {
        let fd = open(env, "f");
        let id = call(env, Syscall::Mmap, &[fd, MAP_BASE as u32]).unwrap();
        assert_ne!(id, MAP_FAILED);
        // Closing the descriptor must not tear the mapping down: mmap
        // reopened the file for itself.
        assert_eq!(call(env, Syscall::Close, &[fd]).unwrap(), 0);
        let mut got = [0u8; 7];
        env.read_bytes(MAP_BASE, &mut got).unwrap();
        assert_eq!(&got, b"mapped!");
        let _ = call(env, Syscall::Exit, &[0]);
    });

    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), 0);
}

#[test]
fn dirty_mapped_pages_write_back_through_eviction() {
    // Pool smaller than the mapping: pages get evicted (write-back) and
    // reloaded from the file while the program sweeps over them.
    let pages = 8;
    let len = pages * PAGE_SIZE;
    let kernel = Kernel::new(KernelConfig {
        user_frames: 4,
        swap_pages: 64,
    });
    seed_file(&kernel, "big", &vec![0u8; len]);

    kernel.register_program("main", move |env| {
        let fd = open(env, "big");
        let id = call(env, Syscall::Mmap, &[fd, MAP_BASE as u32]).unwrap();
        assert_ne!(id, MAP_FAILED);

        for i in 0..pages {
            env.write_bytes(MAP_BASE + i * PAGE_SIZE, &[i as u8 + 1; 32]).unwrap();
        }
        // Sweep again: earlier pages were evicted and come back from the
        // file with their written contents.
        for i in 0..pages {
            let mut got = [0u8; 32];
            env.read_bytes(MAP_BASE + i * PAGE_SIZE, &mut got).unwrap();
            assert_eq!(got, [i as u8 + 1; 32], "page {i}");
        }
        assert_eq!(call(env, Syscall::Munmap, &[id]).unwrap(), 0);
        let _ = call(env, Syscall::Exit, &[0]);
    });

    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), 0);

    // File-backed pages never consume swap.
    assert_eq!(kernel.swap.used_count(), 0);

    let fs = kernel.filesys.lock();
    let file = fs.open("big").unwrap();
    for i in 0..pages {
        let mut got = [0u8; 32];
        assert_eq!(file.read_at(i * PAGE_SIZE, &mut got), 32);
        assert_eq!(got, [i as u8 + 1; 32]);
    }
}

#[test]
fn mmap_preconditions_fail_cleanly() {
    let kernel = Kernel::new(KernelConfig::default());
    seed_file(&kernel, "f", b"x");
    kernel.filesys.lock().create("empty", 0);

    kernel.register_program("main", |env| {
        let fd = open(env, "f");

        // Console descriptors and unknown descriptors are not mappable.
        assert_eq!(call(env, Syscall::Mmap, &[0, MAP_BASE as u32]).unwrap(), MAP_FAILED);
        assert_eq!(call(env, Syscall::Mmap, &[1, MAP_BASE as u32]).unwrap(), MAP_FAILED);
        assert_eq!(call(env, Syscall::Mmap, &[77, MAP_BASE as u32]).unwrap(), MAP_FAILED);

        // Null and unaligned addresses.
        assert_eq!(call(env, Syscall::Mmap, &[fd, 0]).unwrap(), MAP_FAILED);
        assert_eq!(
            call(env, Syscall::Mmap, &[fd, MAP_BASE as u32 + 4]).unwrap(),
            MAP_FAILED
        );

        // Zero-length files are rejected at mmap time.
        let empty_fd = open(env, "empty");
        assert_eq!(
            call(env, Syscall::Mmap, &[empty_fd, MAP_BASE as u32]).unwrap(),
            MAP_FAILED
        );

        // The mapping may not reach into the stack region.
        assert_eq!(
            call(env, Syscall::Mmap, &[fd, STACK_LIMIT as u32]).unwrap(),
            MAP_FAILED
        );
        let last_legal = (STACK_LIMIT - PAGE_SIZE) as u32;
        let id = call(env, Syscall::Mmap, &[fd, last_legal]).unwrap();
        assert_ne!(id, MAP_FAILED);
        assert_eq!(call(env, Syscall::Munmap, &[id]).unwrap(), 0);

        let _ = call(env, Syscall::Exit, &[0]);
    });

    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), 0);
}

#[test]
fn overlapping_mappings_roll_back() {
    let kernel = Kernel::new(KernelConfig::default());
    seed_file(&kernel, "f", &vec![1u8; 2 * PAGE_SIZE]);

    kernel.register_program("main", |env| {
        let fd = open(env, "f");
        let id = call(env, Syscall::Mmap, &[fd, MAP_BASE as u32]).unwrap();
        assert_ne!(id, MAP_FAILED);

        let before = env.process().spt().lock().len();
        // Overlaps the second page of the first mapping.
        assert_eq!(
            call(env, Syscall::Mmap, &[fd, (MAP_BASE + PAGE_SIZE) as u32]).unwrap(),
            MAP_FAILED
        );
        // The failed attempt left no descriptors behind.
        assert_eq!(env.process().spt().lock().len(), before);

        let _ = call(env, Syscall::Exit, &[0]);
    });

    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), 0);
}

#[test]
fn munmap_of_unknown_id_is_fatal() {
    let kernel = Kernel::new(KernelConfig::default());
    kernel.register_program("main", |env| {
        assert_eq!(call(env, Syscall::Munmap, &[12345]), Err(Exited));
    });
    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), -1);
}

#[test]
fn exit_flushes_dirty_mappings() {
    let kernel = Kernel::new(KernelConfig::default());
    seed_file(&kernel, "f", &vec![0u8; PAGE_SIZE]);

    kernel.register_program("main", |env| {
        let fd = open(env, "f");
        let id = call(env, Syscall::Mmap, &[fd, MAP_BASE as u32]).unwrap();
        assert_ne!(id, MAP_FAILED);
        env.write_bytes(MAP_BASE + 8, b"kept").unwrap();
        // Exit without munmap: teardown must write the page back.
        let _ = call(env, Syscall::Exit, &[0]);
    });

    let pid = kernel.run("main").unwrap();
    assert_eq!(kernel.wait(pid), 0);

    let fs = kernel.filesys.lock();
    let file = fs.open("f").unwrap();
    let mut got = [0u8; 4];
    assert_eq!(file.read_at(8, &mut got), 4);
    assert_eq!(&got, b"kept");
}
