//! IO handling for the simulator's console.
//!
//! The environment-call services (`syscall`) that print or read
//! go through a console device, whose interface is defined with the [`IODevice`] trait.
//! This is exposed to the simulator with the [`SimIO`] enum.
//!
//! Besides those two key items, this module also includes:
//! - [`EmptyIO`]: An `IODevice` holding the implementation for a lack of IO support.
//! - [`BufferedIO`]: An `IODevice` holding a buffered implementation for IO.
//! - [`BiChannelIO`]: An `IODevice` holding a threaded/channel implementation for IO.
//! - [`CustomIO`]: An `IODevice` that can be used to wrap around custom IO implementations.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

/// A console device that can be read from and written to.
pub trait IODevice {
    /// Reads the next byte of input.
    ///
    /// This may block until a byte is available.
    /// This returns `None` if the input is closed (no more bytes will ever arrive).
    fn read_byte(&self) -> Option<u8>;

    /// Writes bytes to the output.
    ///
    /// This returns whether the write was successful or not.
    fn write_bytes(&self, data: &[u8]) -> bool;

    /// Tries to close this IO device.
    fn close(self);
}
impl dyn IODevice {} // assert IODevice is dyn safe

/// No IO. Input is always closed and output is discarded.
pub struct EmptyIO;
impl IODevice for EmptyIO {
    fn read_byte(&self) -> Option<u8> {
        None
    }

    fn write_bytes(&self, _data: &[u8]) -> bool {
        false
    }

    fn close(self) {}
}

/// IO that reads from an input buffer and writes to an output buffer.
///
/// Reading from an empty input buffer acts as closed input.
///
/// The buffers can be accessed in code via [`BufferedIO::get_input`] and [`BufferedIO::get_output`].
///
/// Note that if a input/output lock guard is acquired from one of the locks of this IO,
/// the input/output becomes temporarily inaccessible to the simulator.
/// Thus, a lock guard should never be leaked otherwise the simulator loses access to the input/output.
///
/// ```
/// use mips_ensemble::sim::io::{BufferedIO, IODevice};
///
/// let io = BufferedIO::new();
/// io.get_input().write().unwrap().extend(b"hi");
///
/// assert_eq!(io.read_byte(), Some(b'h'));
/// assert_eq!(io.read_byte(), Some(b'i'));
/// assert_eq!(io.read_byte(), None);
///
/// assert!(io.write_bytes(b"ok"));
/// assert_eq!(&*io.get_output().read().unwrap(), b"ok");
/// ```
#[derive(Clone)]
pub struct BufferedIO {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>
}
impl BufferedIO {
    /// Creates a new BufferedIO.
    pub fn new() -> Self {
        Self { input: Default::default(), output: Default::default() }
    }
    /// Creates a new BufferedIO from already defined buffers.
    pub fn with_bufs(input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { input, output }
    }

    fn try_input(&self) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match self.input.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
    fn try_output(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.output.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Gets a reference to the input buffer.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// Gets a reference to the output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }
}
impl Default for BufferedIO {
    fn default() -> Self {
        Self::new()
    }
}
impl IODevice for BufferedIO {
    fn read_byte(&self) -> Option<u8> {
        self.try_input()?.pop_front()
    }

    fn write_bytes(&self, data: &[u8]) -> bool {
        match self.try_output() {
            Some(mut out) => {
                out.extend_from_slice(data);
                true
            },
            None => false
        }
    }

    fn close(self) {}
}

/// A helper struct for [`BiChannelIO::new`],
/// indicating the channel is closed and no more reads/writes will come from it.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stop;

/// An IO that reads from one channel and writes to another.
///
/// Reads block until the reader channel delivers a byte,
/// and report closed input once the reader stops.
/// Writes are sent to the writer channel one byte at a time.
pub struct BiChannelIO {
    read_data:    cbc::Receiver<u8>,
    #[allow(unused)]
    read_handler: JoinHandle<()>,

    write_data:    cbc::Sender<u8>,
    write_handler: JoinHandle<()>
}
impl BiChannelIO {
    /// Creates a new bi-channel IO device with the given reader and writer.
    ///
    /// This calls the reader function every time the IO input receives a byte.
    /// The reader function should block until a byte is ready, or return Stop
    /// if there are no more bytes to read.
    ///
    /// This calls the writer function every time a byte needs to be written to the
    /// IO output.
    ///
    /// This uses threads to read and write from input and output. As such,
    /// the channels will continue to poll input and output even when the simulator
    /// is not running.
    pub fn new(
        mut reader: impl FnMut() -> Result<u8, Stop> + Send + 'static,
        mut writer: impl FnMut(u8) -> Result<(), Stop> + Send + 'static
    ) -> Self {
        let (read_tx, read_rx) = cbc::bounded(1);
        let (write_tx, write_rx) = cbc::bounded(1);

        // Reader thread:
        let read_handler = std::thread::spawn(move || loop {
            let Ok(byte) = reader() else { return };
            let Ok(()) = read_tx.send(byte) else { return };
        });

        // Writer thread:
        let write_handler = std::thread::spawn(move || {
            for byte in write_rx {
                let Ok(()) = writer(byte) else { return };
            }
        });

        Self {
            read_data: read_rx,
            read_handler,
            write_data: write_tx,
            write_handler
        }
    }

    /// Creates a bi-channel IO device with stdin being the read data and stdout being the write data.
    ///
    /// Note that due to how stdin works in terminals, data is only sent once a new line is typed.
    /// Additionally, this flushes stdout every time a byte is written.
    pub fn stdio() -> Self {
        use std::io::{self, BufRead, Write};

        Self::new(
            || {
                let mut stdin = io::stdin().lock();
                let &[byte, ..] = stdin.fill_buf().map_err(|_| Stop)? else {
                    // EOF
                    return Err(Stop);
                };

                stdin.consume(1);
                Ok(byte)
            },
            |byte| {
                let mut stdout = io::stdout().lock();
                stdout.write_all(&[byte]).map_err(|_| Stop)?;
                stdout.flush().map_err(|_| Stop)
            }
        )
    }
}

impl IODevice for BiChannelIO {
    fn read_byte(&self) -> Option<u8> {
        // Disconnected occurs once the reader stops (or panics).
        self.read_data.recv().ok()
    }

    fn write_bytes(&self, data: &[u8]) -> bool {
        data.iter().all(|&b| self.write_data.send(b).is_ok())
    }

    fn close(self) {
        let Self {
            read_data,
            read_handler: _,
            write_data,
            write_handler
        } = self;

        // Drop the channels.
        std::mem::drop(read_data);
        std::mem::drop(write_data);

        // Wait for the writer to flush what it has.
        // The reader is not joined, since it can be stuck waiting on input.
        let _ = write_handler.join();
    }
}

// `Box<dyn IODevice>` does not work.
// It doesn't implement IODevice because it doesn't implement close
// (because you can't close on an unsized dyn IODevice).
//
// This puts the device in an Option and closes it by taking it out,
// making close only require &mut Self instead of Self.
trait IODeviceMutClosable {
    fn read_byte(&self) -> Option<u8>;
    fn write_bytes(&self, data: &[u8]) -> bool;

    /// Closes but doesn't consume the object.
    ///
    /// The object acts as [`EmptyIO`] after this point.
    fn take_close(&mut self);
}
impl<D: IODevice> IODeviceMutClosable for Option<D> {
    fn read_byte(&self) -> Option<u8> {
        self.as_ref()?.read_byte()
    }
    fn write_bytes(&self, data: &[u8]) -> bool {
        self.as_ref().is_some_and(|d| d.write_bytes(data))
    }
    fn take_close(&mut self) {
        if let Some(d) = self.take() {
            d.close();
        }
    }
}

/// An opaque box that holds custom defined IO.
///
/// This can be used to use a different implementation of IO
/// than the ones implemented in this module.
pub struct CustomIO(Box<dyn IODeviceMutClosable + Send + Sync>);
impl CustomIO {
    /// Creates a new custom IO.
    pub fn new(device: impl IODevice + Send + Sync + 'static) -> Self {
        CustomIO(Box::new(Some(device)))
    }
}
impl IODevice for CustomIO {
    fn read_byte(&self) -> Option<u8> {
        self.0.read_byte()
    }

    fn write_bytes(&self, data: &[u8]) -> bool {
        self.0.write_bytes(data)
    }

    fn close(mut self) {
        self.0.take_close();
    }
}

/// All the variants of IO accepted by the Machine.
#[derive(Default)]
pub enum SimIO {
    /// No IO. This corresponds to the implementation of [`EmptyIO`].
    #[default]
    Empty,
    /// A buffered implementation. See [`BufferedIO`].
    Buffered(BufferedIO),
    /// A bi-channel IO implementation. See [`BiChannelIO`].
    BiChannel(BiChannelIO),
    /// A custom IO implementation. See [`CustomIO`].
    Custom(CustomIO)
}
impl std::fmt::Debug for SimIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimIO")
            .finish_non_exhaustive()
    }
}
impl From<EmptyIO> for SimIO {
    fn from(_value: EmptyIO) -> Self {
        SimIO::Empty
    }
}
impl From<BufferedIO> for SimIO {
    fn from(value: BufferedIO) -> Self {
        SimIO::Buffered(value)
    }
}
impl From<BiChannelIO> for SimIO {
    fn from(value: BiChannelIO) -> Self {
        SimIO::BiChannel(value)
    }
}
impl From<CustomIO> for SimIO {
    fn from(value: CustomIO) -> Self {
        SimIO::Custom(value)
    }
}
impl IODevice for SimIO {
    fn read_byte(&self) -> Option<u8> {
        match self {
            SimIO::Empty => EmptyIO.read_byte(),
            SimIO::Buffered(io) => io.read_byte(),
            SimIO::BiChannel(io) => io.read_byte(),
            SimIO::Custom(io) => io.read_byte(),
        }
    }

    fn write_bytes(&self, data: &[u8]) -> bool {
        match self {
            SimIO::Empty => EmptyIO.write_bytes(data),
            SimIO::Buffered(io) => io.write_bytes(data),
            SimIO::BiChannel(io) => io.write_bytes(data),
            SimIO::Custom(io) => io.write_bytes(data)
        }
    }

    fn close(self) {
        match self {
            SimIO::Empty => EmptyIO.close(),
            SimIO::Buffered(io) => io.close(),
            SimIO::BiChannel(io) => io.close(),
            SimIO::Custom(io) => io.close()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{BiChannelIO, BufferedIO, CustomIO, IODevice, SimIO, Stop};

    #[test]
    fn test_buffered_shared() {
        let io = BufferedIO::new();
        let sim_io = SimIO::from(io.clone());

        io.get_input().write().unwrap().extend(b"x");
        assert_eq!(sim_io.read_byte(), Some(b'x'));
        assert_eq!(sim_io.read_byte(), None);

        assert!(sim_io.write_bytes(b"abc"));
        assert_eq!(&*io.get_output().read().unwrap(), b"abc");
    }

    #[test]
    fn test_buffered_locked() {
        let io = BufferedIO::new();
        let guard = io.get_output().write().unwrap();
        assert!(!io.write_bytes(b"abc"));
        drop(guard);
        assert!(io.write_bytes(b"abc"));
    }

    #[test]
    fn test_bichannel() {
        let mut input = b"12".to_vec().into_iter();
        let output = Arc::new(Mutex::new(vec![]));
        let out = Arc::clone(&output);

        let io = BiChannelIO::new(
            move || input.next().ok_or(Stop),
            move |b| {
                out.lock().unwrap().push(b);
                Ok(())
            }
        );

        assert_eq!(io.read_byte(), Some(b'1'));
        assert_eq!(io.read_byte(), Some(b'2'));
        assert_eq!(io.read_byte(), None);

        assert!(io.write_bytes(b"ok"));
        io.close();
        assert_eq!(&*output.lock().unwrap(), b"ok");
    }

    #[test]
    fn test_custom_and_empty() {
        let buf = BufferedIO::new();
        buf.get_input().write().unwrap().push_back(7);
        let custom = SimIO::from(CustomIO::new(buf.clone()));
        assert_eq!(custom.read_byte(), Some(7));
        assert!(custom.write_bytes(b"z"));
        assert_eq!(&*buf.get_output().read().unwrap(), b"z");
        custom.close();

        let empty = SimIO::default();
        assert_eq!(empty.read_byte(), None);
        assert!(!empty.write_bytes(b"z"));
    }
}
