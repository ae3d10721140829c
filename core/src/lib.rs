pub mod types;
pub mod util;
pub mod val;

// Register bytecode VM
pub mod vm;
