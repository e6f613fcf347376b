//! Wake-up signalling between the hub and a plugin process (spec §4.2): the
//! ring buffer itself carries no blocking primitive, so every write is
//! paired with a notify so the other side's consumer loop can block instead
//! of busy-polling.
//!
//! On Linux this is a real `eventfd` (counting, non-blocking-readable)
//! inherited by the child process across `fork`/`exec`. Anywhere else — or
//! if eventfd creation fails — a self-pipe stands in: writing one byte
//! signals, reading drains whatever accumulated.

use std::io;

use tokio::io::unix::AsyncFd;

/// Something that can be signalled ("a record is ready") and awaited from
/// the other end. Implementors must be safe to hand the raw fd to a child
/// process and keep working from both sides.
pub trait Notifier: Send + Sync {
    /// Wakes up anyone blocked in [`Notifier::notified`].
    fn notify(&self) -> io::Result<()>;

    /// The raw fd a plugin child process should inherit to observe this
    /// notifier. `None` if this notifier has no fd representation.
    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd>;
}

#[cfg(unix)]
mod eventfd_impl {
    use super::*;
    use nix::sys::eventfd::{EventFd, EfdFlags};
    use std::os::unix::io::{AsRawFd, RawFd};

    /// Linux `eventfd`-backed notifier. The fd is non-blocking and
    /// close-on-exec is deliberately NOT set, so [`crate::process`] can
    /// inherit it into the spawned plugin.
    pub struct EventFdNotifier {
        fd: AsyncFd<EventFd>,
    }

    impl EventFdNotifier {
        pub fn new() -> io::Result<Self> {
            let efd = EventFd::from_flags(EfdFlags::EFD_NONBLOCK)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(Self {
                fd: AsyncFd::new(efd)?,
            })
        }

        /// Blocks until at least one notification has arrived since the
        /// last call, draining the accumulated counter value.
        pub async fn notified(&self) -> io::Result<()> {
            loop {
                let mut guard = self.fd.readable().await?;
                match guard.get_inner().read() {
                    Ok(_) => {
                        guard.clear_ready();
                        return Ok(());
                    }
                    Err(e) if e == nix::errno::Errno::EAGAIN => {
                        guard.clear_ready();
                        continue;
                    }
                    Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
                }
            }
        }
    }

    impl Notifier for EventFdNotifier {
        fn notify(&self) -> io::Result<()> {
            self.fd
                .get_ref()
                .write(1)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        }

        fn raw_fd(&self) -> Option<RawFd> {
            Some(self.fd.get_ref().as_raw_fd())
        }
    }
}

#[cfg(unix)]
pub use eventfd_impl::EventFdNotifier;

/// Portable fallback built on a non-blocking self-pipe. Used on platforms
/// without `eventfd`, or when `eventfd` creation fails (e.g. fd-limit
/// exhaustion). The write side never blocks: `try_write` silently drops a
/// notification into an already-full pipe, which is fine because the
/// consumer only cares that *at least one* byte is waiting, not how many.
#[cfg(unix)]
pub struct PipeNotifier {
    reader: tokio::net::unix::pipe::Receiver,
    writer: tokio::net::unix::pipe::Sender,
}

#[cfg(unix)]
impl PipeNotifier {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = os_pipe::pipe()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            reader: tokio::net::unix::pipe::Receiver::from_file(reader.into())?,
            writer: tokio::net::unix::pipe::Sender::from_file(writer.into())?,
        })
    }

    /// Blocks until at least one byte is available, then drains everything
    /// buffered so a burst of notifies collapses into one wake-up.
    pub async fn notified(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            self.reader.readable().await?;
            match self.reader.try_read(&mut buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "pipe closed")),
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(unix)]
impl Notifier for PipeNotifier {
    fn notify(&self) -> io::Result<()> {
        match self.writer.try_write(&[1]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        Some(self.writer.as_raw_fd())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipe_notifier_wakes_on_notify() {
        let mut notifier = PipeNotifier::new().unwrap();
        notifier.notify().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), notifier.notified())
            .await
            .expect("notified() should resolve promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn eventfd_notifier_wakes_on_notify() {
        let notifier = EventFdNotifier::new().unwrap();
        notifier.notify().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), notifier.notified())
            .await
            .expect("notified() should resolve promptly")
            .unwrap();
    }
}
