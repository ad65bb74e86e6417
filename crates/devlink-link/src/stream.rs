use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::address::LinkAddress;
use crate::error::{LinkError, Result};

/// An open device link. Implements `Read` and `Write`.
///
/// This is the fundamental I/O type handed to the link worker and the frame
/// writer. Both halves of a transport hold their own clone of the stream.
pub struct LinkStream {
    inner: LinkStreamInner,
    path: PathBuf,
}

enum LinkStreamInner {
    #[cfg(feature = "serial")]
    Serial(std::fs::File),
    Socket(UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(file) => file.read(buf),
            LinkStreamInner::Socket(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(file) => file.write(buf),
            LinkStreamInner::Socket(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(file) => file.flush(),
            LinkStreamInner::Socket(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Open the link described by `address`.
    pub fn open(address: &LinkAddress) -> Result<Self> {
        match address {
            LinkAddress::Serial { path, baud_rate } => Self::open_serial(path, *baud_rate),
            LinkAddress::Socket { path } => Self::connect(path),
        }
    }

    #[cfg(feature = "serial")]
    fn open_serial(path: &Path, baud_rate: u32) -> Result<Self> {
        let file = crate::serial::open_raw(path, baud_rate)?;
        debug!(?path, baud_rate, "opened serial link");
        Ok(Self {
            inner: LinkStreamInner::Serial(file),
            path: path.to_path_buf(),
        })
    }

    #[cfg(not(feature = "serial"))]
    fn open_serial(_path: &Path, _baud_rate: u32) -> Result<Self> {
        Err(LinkError::Unsupported("serial"))
    }

    /// Connect to a Unix domain socket link (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| LinkError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to socket link");
        Ok(Self::from_socket(stream, path.to_path_buf()))
    }

    /// A connected pair of in-process links, mainly for tests and simulators.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((
            Self::from_socket(left, PathBuf::from("<pair:left>")),
            Self::from_socket(right, PathBuf::from("<pair:right>")),
        ))
    }

    pub(crate) fn from_socket(stream: UnixStream, path: PathBuf) -> Self {
        Self {
            inner: LinkStreamInner::Socket(stream),
            path,
        }
    }

    /// Path the link was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Medium name for diagnostics.
    pub fn medium(&self) -> &'static str {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => "serial",
            LinkStreamInner::Socket(_) => "socket",
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(file) => LinkStreamInner::Serial(file.try_clone()?),
            LinkStreamInner::Socket(stream) => LinkStreamInner::Socket(stream.try_clone()?),
        };
        Ok(Self {
            inner,
            path: self.path.clone(),
        })
    }

    /// Wait until the link has data to read.
    ///
    /// Returns `Ok(false)` when `timeout` elapses first. Hang-up and error
    /// conditions count as readable so the following `read` reports them.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pfd` is a valid pollfd for the duration of the call and the
        // descriptor is owned by this stream.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(LinkError::Io(err));
        }
        Ok(rc > 0 && pfd.revents != 0)
    }

    /// Mark the descriptor close-on-exec so spawned task processes never
    /// inherit the link.
    pub fn set_cloexec(&self) -> Result<()> {
        let fd = self.raw_fd();
        // SAFETY: fcntl on a descriptor owned by this stream.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(LinkError::Io(std::io::Error::last_os_error()));
        }
        // SAFETY: as above; only FD_CLOEXEC is added.
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
        if rc < 0 {
            return Err(LinkError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Whether the descriptor is marked close-on-exec.
    pub fn is_cloexec(&self) -> Result<bool> {
        // SAFETY: fcntl on a descriptor owned by this stream.
        let flags = unsafe { libc::fcntl(self.raw_fd(), libc::F_GETFD) };
        if flags < 0 {
            return Err(LinkError::Io(std::io::Error::last_os_error()));
        }
        Ok(flags & libc::FD_CLOEXEC != 0)
    }

    /// Take the exclusive advisory lock on a serial device.
    ///
    /// Sockets are exclusive by construction; this is a no-op for them.
    pub fn lock_exclusive(&self) -> Result<()> {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(file) => crate::serial::lock(file, &self.path),
            LinkStreamInner::Socket(_) => Ok(()),
        }
    }

    /// Release the advisory lock taken by [`lock_exclusive`](Self::lock_exclusive).
    pub fn unlock(&self) -> Result<()> {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(file) => crate::serial::unlock(file),
            LinkStreamInner::Socket(_) => Ok(()),
        }
    }

    /// Shut down both directions of a socket link.
    ///
    /// Wakes a peer blocked on the other end; serial links have no
    /// equivalent and ignore this.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => Ok(()),
            LinkStreamInner::Socket(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(LinkError::Io(err)),
            },
        }
    }

    fn raw_fd(&self) -> RawFd {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(file) => file.as_raw_fd(),
            LinkStreamInner::Socket(stream) => stream.as_raw_fd(),
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("medium", &self.medium())
            .field("path", &self.path)
            .finish()
    }
}
