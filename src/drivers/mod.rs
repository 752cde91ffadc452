pub mod cci;
pub mod uart;
