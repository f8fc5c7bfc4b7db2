use std::fs::File;
use std::io::{Error, Result};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::{AsRawFd, FromRawFd};

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

/// Create an anonymous pipe, returning `(read, write)` ends.
pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

pub fn fcntl(fd: i32, cmd: i32, arg1: Option<i32>) -> Result<i32> {
    check_err(unsafe {
        match arg1 {
            Some(arg1) => libc::fcntl(fd, cmd, arg1),
            None => libc::fcntl(fd, cmd),
        }
    })
}

/// Mark a descriptor close-on-exec so children do not inherit it.
pub fn set_cloexec(f: &File) -> Result<()> {
    let fd = f.as_raw_fd();
    let old = fcntl(fd, libc::F_GETFD, None)?;
    fcntl(fd, libc::F_SETFD, Some(old | libc::FD_CLOEXEC))?;
    Ok(())
}

#[cfg(test)]
pub fn get_cloexec(f: &File) -> Result<bool> {
    let flags = fcntl(f.as_raw_fd(), libc::F_GETFD, None)?;
    Ok(flags & libc::FD_CLOEXEC != 0)
}

/// Preferred write block size for the pipe.
///
/// Too small merely costs syscalls; too large can block the writer, so
/// the fallback errs low.
pub fn pipe_block_size(f: &File) -> usize {
    match f.metadata() {
        Ok(meta) => meta.blksize() as usize,
        Err(_) => 2048,
    }
}

pub const SIGTERM: i32 = libc::SIGTERM;

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal as libc::c_int) })?;
    Ok(())
}
