//! Host procedures called from generated code to perform I/O.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

/// Value returned by [`HostIo::read_byte`] once the input is exhausted.
/// Stored into a cell it becomes `0xFF`.
pub const EOF: i32 = -1;

/// Where the `,` instruction reads from.
pub enum InputTarget {
    Stdin,
    Custom(Rc<RefCell<dyn Read>>)
}

/// Where the `.` instruction writes to.
pub enum OutputTarget {
    Stdout,
    Custom(Rc<RefCell<dyn Write>>)
}

impl Default for InputTarget {
    fn default() -> Self {
        InputTarget::Stdin
    }
}

impl Default for OutputTarget {
    fn default() -> Self {
        OutputTarget::Stdout
    }
}

/// I/O state shared between a compiled program and the host procedures it calls.
#[derive(Default)]
pub struct HostIo {
    input: InputTarget,
    output: OutputTarget
}

impl HostIo {

    pub fn new(input: InputTarget, output: OutputTarget) -> HostIo {
        HostIo {
            input,
            output
        }
    }

    /// Reads a single byte, or returns [`EOF`] at the end of the stream.
    /// Read errors are logged and reported as end of input.
    pub fn read_byte(&mut self) -> i32 {
        let mut buf = [0u8; 1];
        loop {
            let res = match self.input {
                InputTarget::Stdin => io::stdin().read(&mut buf),
                InputTarget::Custom(ref r) => r.borrow_mut().read(&mut buf)
            };
            return match res {
                Ok(0) => EOF,
                Ok(_) => i32::from(buf[0]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Error reading input: {}", e);
                    EOF
                }
            };
        }
    }

    /// Writes the low byte of `value`.
    pub fn write_byte(&mut self, value: i32) {
        let buf = [value as u8];
        let res = match self.output {
            OutputTarget::Stdout => io::stdout().write_all(&buf),
            OutputTarget::Custom(ref w) => w.borrow_mut().write_all(&buf)
        };
        if let Err(e) = res {
            warn!("Error writing output: {}", e);
        }
    }

    pub fn flush(&mut self) {
        let res = match self.output {
            OutputTarget::Stdout => io::stdout().flush(),
            OutputTarget::Custom(ref w) => w.borrow_mut().flush()
        };
        if let Err(e) = res {
            warn!("Error flushing output: {}", e);
        }
    }

}

/// Entry point for native code reading a byte.
pub extern "C" fn bf_read_byte(io: *mut HostIo) -> i32 {
    // Generated code always passes the pointer of the `HostIo` owned by its routine
    unsafe { (*io).read_byte() }
}

/// Entry point for native code writing a byte.
pub extern "C" fn bf_write_byte(io: *mut HostIo, value: i32) {
    unsafe { (*io).write_byte(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_until_eof() {
        let input = Rc::new(RefCell::new(Cursor::new(vec![b'a', 0xFF])));
        let mut io = HostIo::new(InputTarget::Custom(input), OutputTarget::default());
        assert_eq!(io.read_byte(), 97);
        assert_eq!(io.read_byte(), 255);
        assert_eq!(io.read_byte(), EOF);
        assert_eq!(io.read_byte(), EOF);
    }

    #[test]
    fn test_write_truncates() {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut io = HostIo::new(InputTarget::default(), OutputTarget::Custom(output.clone()));
        io.write_byte(0x141);
        io.write_byte(EOF);
        io.flush();
        assert_eq!(*output.borrow(), vec![0x41, 0xFF]);
    }

    #[test]
    fn test_extern_entry_points() {
        let input = Rc::new(RefCell::new(Cursor::new(vec![7u8])));
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut io = HostIo::new(InputTarget::Custom(input), OutputTarget::Custom(output.clone()));
        let value = bf_read_byte(&mut io);
        bf_write_byte(&mut io, value + 1);
        assert_eq!(*output.borrow(), vec![8]);
    }

}
