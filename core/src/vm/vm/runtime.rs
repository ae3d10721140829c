pub(super) mod exec;
pub(crate) mod frame;
