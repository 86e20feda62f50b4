use crate::backend::{Backend, Buffer, Condition, Register};

/// Emits the native loop zeroing the whole tape, leaving the cursor at 0.
/// ```text
///     mov cursor, 0
/// clear:
///     mov byte [tape + cursor], 0
///     add cursor, 1
///     cmp cursor, size
///     jb clear
///     mov cursor, 0
/// ```
pub fn emit_tape_reset<B: Backend>(backend: &mut B, tape: Buffer, cursor: Register, size: usize) {
    let clear = backend.new_label();
    backend.mov(cursor.into(), 0);
    backend.bind(clear);
    let cell = backend.indexed(tape, cursor);
    backend.mov(cell.into(), 0);
    backend.add(cursor.into(), 1);
    backend.jump_if(Condition::Below, cursor.into(), size as i64, clear);
    backend.mov(cursor.into(), 0);
}
