pub trait OpCode {
    fn op_code(&self) -> u8;
}

/// ROM-level commands, valid right after a reset
#[derive(Clone, Copy, Debug)]
#[repr(u8)]
pub enum Command {
    MatchRom = 0x55,
    SearchRom = 0xF0,
}

impl OpCode for Command {
    fn op_code(&self) -> u8 {
        *self as _
    }
}
