//! Native serial port implementation using the `serialport` crate.
//!
//! On Unix the terminal attributes found before opening are captured and
//! written back when the port is closed or dropped, so the device is left
//! the way the user had it.

use {
    crate::{
        error::Result,
        port::{Port, SerialConfig},
    },
    log::{debug, trace, warn},
    serialport::{ClearBuffer, SerialPort},
    std::io::{Read, Write},
};

#[cfg(unix)]
type NativeHandle = serialport::TTYPort;

#[cfg(windows)]
type NativeHandle = serialport::COMPort;

/// Native serial port implementation.
pub struct NativePort {
    port: Option<NativeHandle>,
    name: String,
    #[cfg(unix)]
    saved: Option<termios::Saved>,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    ///
    /// The line is configured 8N1 without flow control and pending input is
    /// discarded.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        #[cfg(unix)]
        let saved = termios::Saved::capture(&config.port_name)?;

        let mut port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open_native()?;
        port.clear(ClearBuffer::Input)?;

        debug!(
            "Opened {} at {} baud, timeout {:?}",
            config.port_name, config.baud_rate, config.timeout
        );

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            #[cfg(unix)]
            saved,
        })
    }

    fn restore(&mut self) {
        #[cfg(unix)]
        if let (Some(port), Some(saved)) = (self.port.as_ref(), self.saved.take()) {
            use std::os::fd::AsRawFd;
            if let Err(e) = saved.apply(port.as_raw_fd()) {
                warn!("Failed to restore settings of {}: {e}", self.name);
            } else {
                trace!("Restored terminal settings of {}", self.name);
            }
        }
    }
}

impl Port for NativePort {
    fn clear_input(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::Input)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.restore();
        self.port.take();
        Ok(())
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        self.restore();
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

#[cfg(unix)]
mod termios {
    use {
        log::warn,
        std::{
            fs::OpenOptions,
            io,
            mem::MaybeUninit,
            os::{
                fd::{AsRawFd, RawFd},
                unix::fs::OpenOptionsExt,
            },
        },
    };

    /// Terminal attributes captured before the port was configured.
    pub(super) struct Saved(libc::termios);

    impl Saved {
        /// Read the current attributes of `path`.
        ///
        /// A missing device is an error. A device that is not a terminal
        /// yields `None` and is left to `serialport` to reject.
        #[allow(unsafe_code)]
        pub(super) fn capture(path: &str) -> io::Result<Option<Self>> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(path)?;

            let mut attrs = MaybeUninit::<libc::termios>::uninit();
            // SAFETY: the descriptor stays open for the duration of the call
            // and `attrs` points to writable storage of the right size.
            let rc = unsafe { libc::tcgetattr(file.as_raw_fd(), attrs.as_mut_ptr()) };
            if rc != 0 {
                warn!(
                    "Cannot read terminal settings of {path}: {}",
                    io::Error::last_os_error()
                );
                return Ok(None);
            }
            // SAFETY: tcgetattr succeeded and initialised the structure.
            Ok(Some(Self(unsafe { attrs.assume_init() })))
        }

        /// Write the captured attributes back immediately.
        #[allow(unsafe_code)]
        pub(super) fn apply(&self, fd: RawFd) -> io::Result<()> {
            // SAFETY: `fd` belongs to an open port owned by the caller and
            // `self.0` is a fully initialised termios structure.
            let rc = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw const self.0) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }
}
