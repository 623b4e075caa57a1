//! Serial character device transport.
//!
//! The device is switched to raw 8N1 at the requested baud rate. Read
//! timeouts are implemented with `poll(2)` on the descriptor.

use anyhow::Result;
use std::fs::File;
use std::io;
use std::time::Duration;

use super::Transport;

pub struct SerialTransport {
    file: File,
    path: String,
    baud: u32,
}

impl SerialTransport {
    #[cfg(target_os = "linux")]
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        use anyhow::Context;
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open serial device {}", path))?;
        linux::configure_raw(file.as_raw_fd(), baud)
            .with_context(|| format!("failed to configure serial device {}", path))?;
        log::info!("serial device {} open at {} baud", path, baud);
        Ok(Self {
            file,
            path: path.to_string(),
            baud,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(path: &str, _baud: u32) -> Result<Self> {
        Err(anyhow::anyhow!(
            "serial channel {} is only supported on linux; use a tcp:// bridge",
            path
        ))
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Transport for SerialTransport {
    #[cfg(target_os = "linux")]
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        use std::io::Read;
        use std::os::unix::io::AsRawFd;

        if !linux::wait_readable(self.file.as_raw_fd(), timeout)? {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "serial read timed out"));
        }
        self.file.read(buf)
    }

    #[cfg(not(target_os = "linux"))]
    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        std::io::Read::read(&mut self.file, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        std::io::Write::write(&mut self.file, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        std::io::Write::flush(&mut self.file)
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.path)
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::os::unix::io::RawFd;
    use std::time::Duration;

    fn speed_for(baud: u32) -> io::Result<libc::speed_t> {
        Ok(match baud {
            9600 => libc::B9600,
            19200 => libc::B19200,
            38400 => libc::B38400,
            57600 => libc::B57600,
            115200 => libc::B115200,
            230400 => libc::B230400,
            460800 => libc::B460800,
            921600 => libc::B921600,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported baud rate {}", other),
                ))
            }
        })
    }

    pub(super) fn configure_raw(fd: RawFd, baud: u32) -> io::Result<()> {
        let speed = speed_for(baud)?;
        // SAFETY: `termios` is plain data and `fd` is an open descriptor owned
        // by the caller for the duration of these calls.
        unsafe {
            let mut tio: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tio) != 0 {
                return Err(io::Error::last_os_error());
            }
            libc::cfmakeraw(&mut tio);
            tio.c_cflag |= libc::CLOCAL | libc::CREAD;
            tio.c_cc[libc::VMIN] = 1;
            tio.c_cc[libc::VTIME] = 0;
            if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                return Err(io::Error::last_os_error());
            }
            libc::tcflush(fd, libc::TCIOFLUSH);
        }
        Ok(())
    }

    /// Returns false when nothing became readable within `timeout`.
    pub(super) fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        loop {
            // SAFETY: `pfd` is a valid pollfd and we pass a count of one.
            let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            return Ok(rc > 0);
        }
    }
}
